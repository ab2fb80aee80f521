//! CLI 命令处理模块

pub mod config;
pub mod output;
pub mod report;
pub mod run;
