// 数据库集成测试
use caserun_storage::{
    ExecutionRunRecord, ReportFilter, ReportRepository, StepExecutionRecord, Storage,
    StorageManager,
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

/// 创建测试数据库 (内存模式)
async fn setup_test_db() -> SqlitePool {
    let manager = StorageManager::new_in_memory()
        .await
        .expect("Failed to create test database");
    manager.pool().clone()
}

/// 创建执行结果记录
fn create_test_run(execution_id: &str, testcase: &str, code: &str) -> ExecutionRunRecord {
    ExecutionRunRecord {
        id: 0,
        execution_id: execution_id.to_string(),
        test: "Login".to_string(),
        testcase: testcase.to_string(),
        description: Some(format!("Test case: {}", testcase)),
        country: "FR".to_string(),
        environment: "QA".to_string(),
        system: "WEB".to_string(),
        start_time: Utc::now(),
        end_time: Utc::now(),
        duration_ms: 1000,
        return_code: code.to_string(),
        message: String::new(),
        total_steps: 2,
        ok_count: if code == "OK" { 2 } else { 1 },
        failed_count: if code == "OK" { 0 } else { 1 },
        not_executed_count: 0,
        report: Some(r#"{"steps": []}"#.to_string()),
        created_at: Utc::now(),
    }
}

/// 创建步骤执行记录
fn create_test_step(position: i32, depth: i32, code: &str) -> StepExecutionRecord {
    StepExecutionRecord {
        id: 0,
        run_id: 0,
        position,
        depth,
        test: "Login".to_string(),
        testcase: "TC1".to_string(),
        step_id: position as i64 + 1,
        loop_index: 1,
        sort: position,
        description: format!("Step {}", position),
        library_test: None,
        library_testcase: None,
        condition_operator: "always".to_string(),
        return_code: code.to_string(),
        message: String::new(),
        start_time: Utc::now(),
        end_time: Utc::now(),
        full_end_time: Utc::now(),
        action_count: 1,
    }
}

// ==================== ReportRepository 测试 ====================

#[tokio::test]
async fn test_create_run_with_steps() {
    let pool = setup_test_db().await;
    let repo = ReportRepository::new(pool);

    let mut library = create_test_step(1, 0, "OK");
    library.library_test = Some("Common".to_string());
    library.library_testcase = Some("Login".to_string());

    let steps = vec![
        create_test_step(0, 0, "OK"),
        library,
        create_test_step(2, 1, "OK"),
    ];

    let run_id = repo
        .create(&create_test_run("run-1", "TC1", "OK"), &steps)
        .await
        .unwrap();

    let stored = repo.get_steps(run_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|s| s.run_id == run_id));
    assert_eq!(stored[1].library_testcase.as_deref(), Some("Login"));
    assert_eq!(stored[2].depth, 1);
}

#[tokio::test]
async fn test_duplicate_execution_id_rolls_back() {
    let pool = setup_test_db().await;
    let repo = ReportRepository::new(pool);

    repo.create(&create_test_run("dup", "TC1", "OK"), &[])
        .await
        .unwrap();
    let second = repo
        .create(
            &create_test_run("dup", "TC1", "OK"),
            &[create_test_step(0, 0, "OK")],
        )
        .await;
    assert!(second.is_err());

    let count = repo.count(&ReportFilter::default()).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_list_with_filters() {
    let pool = setup_test_db().await;
    let repo = ReportRepository::new(pool);

    repo.create(&create_test_run("a", "TC1", "OK"), &[])
        .await
        .unwrap();
    repo.create(&create_test_run("b", "TC1", "KO"), &[])
        .await
        .unwrap();
    repo.create(&create_test_run("c", "TC2", "OK"), &[])
        .await
        .unwrap();

    let all = repo.list(&ReportFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let tc1 = repo
        .list(&ReportFilter {
            testcase: Some("TC1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tc1.len(), 2);

    let failed = repo
        .list(&ReportFilter {
            return_code: Some("KO".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].execution_id, "b");

    let limited = repo
        .list(&ReportFilter {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    let future = repo
        .count(&ReportFilter {
            start_time_from: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(future, 0);
}

#[tokio::test]
async fn test_delete_run_removes_steps() {
    let pool = setup_test_db().await;
    let repo = ReportRepository::new(pool);

    let run_id = repo
        .create(
            &create_test_run("to-delete", "TC1", "OK"),
            &[create_test_step(0, 0, "OK")],
        )
        .await
        .unwrap();

    repo.delete(run_id).await.unwrap();

    assert!(repo.get_by_id(run_id).await.unwrap().is_none());
    assert!(repo.get_steps(run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_success_rate() {
    let pool = setup_test_db().await;
    let repo = ReportRepository::new(pool);

    assert_eq!(repo.get_success_rate("Login", "TC1", 7).await.unwrap(), 0.0);

    for (id, code) in [("1", "OK"), ("2", "OK"), ("3", "OK"), ("4", "FA")] {
        repo.create(&create_test_run(id, "TC1", code), &[])
            .await
            .unwrap();
    }

    let rate = repo.get_success_rate("Login", "TC1", 7).await.unwrap();
    assert!((rate - 75.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_storage_facade() {
    let manager = StorageManager::new_in_memory().await.unwrap();
    let storage = Storage::from_manager(&manager);

    storage
        .reports()
        .create(&create_test_run("facade", "TC1", "OK"), &[])
        .await
        .unwrap();

    let runs = storage.reports().list(&ReportFilter::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
}
