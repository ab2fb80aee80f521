//! 配置管理命令

use anyhow::{Context, Result};

use caserun_executor::EngineConfig;

pub async fn handle(action: crate::ConfigAction) -> Result<()> {
    match action {
        crate::ConfigAction::Show { format } => {
            let config = EngineConfig::load().context("加载配置失败")?;
            println!("{}", render(&config, &format)?);
            Ok(())
        }
    }
}

fn render(config: &EngineConfig, format: &str) -> Result<String> {
    let content = match format {
        "toml" => toml::to_string_pretty(config).context("序列化配置失败")?,
        "yaml" => serde_yaml::to_string(config).context("序列化配置失败")?,
        "json" => serde_json::to_string_pretty(config).context("序列化配置失败")?,
        other => anyhow::bail!("不支持的格式: {}", other),
    };
    Ok(content)
}
