//! BFIT服务器主程序

mod settings;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bfit_core::{BfitError, Result};
use bfit_database::{DatabasePool, DatabaseQueries};
use bfit_dicom::{DicomFileReader, RuleTable, SeriesAggregator, TagReader};
use bfit_jobs::{
    HttpInferenceExecutor, InferenceJobHandler, JobDispatcher, JobReconciler, JobRunner,
    LocalJobRunner,
};
use bfit_storage::StorageManager;
use bfit_web::{AppState, WebServer};
use settings::Settings;
use tracing::{error, info};

/// BFIT服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "bfit-server")]
#[command(about = "BFIT 体成分影像分析服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    info!("启动BFIT服务器...");

    let settings = Settings::load(args.config.as_deref())?;
    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .map_err(|e| BfitError::Config(format!("invalid listen_addr: {}", e)))?;

    info!("BFIT服务器配置:");
    info!("  监听地址: {}", settings.listen_addr);
    info!("  数据库: {}", settings.database_url);
    info!("  存储根目录: {}", settings.storage_root);
    info!("  作业超时: {}s", settings.job_timeout_secs);

    // 数据库
    let pool = DatabasePool::connect(&settings.database_url).await?;
    DatabaseQueries::new(&pool).create_tables().await?;

    // 存储
    let storage = Arc::new(StorageManager::new(&settings.storage_root));

    // 协议规则表
    let rules = match &settings.rules_file {
        Some(path) => {
            info!("  规则表: {}", path);
            RuleTable::from_json(&std::fs::read_to_string(path)?)?
        }
        None => {
            info!("  规则表: 内置");
            RuleTable::builtin()
        }
    };
    let reader: Box<dyn TagReader> = Box::new(DicomFileReader::new());
    let aggregator = Arc::new(SeriesAggregator::new(reader, rules));

    // 作业执行链：HTTP推理 -> 结果协调 -> 进程内队列
    let reconciler = Arc::new(JobReconciler::new(pool.clone(), storage.clone()));
    let executor = Arc::new(HttpInferenceExecutor::new(
        settings.endpoints()?,
        storage.clone(),
    ));
    let handler = Arc::new(InferenceJobHandler::new(executor, reconciler.clone()));
    let runner = Arc::new(LocalJobRunner::new(
        handler,
        Duration::from_secs(settings.job_timeout_secs),
    ));
    let runner_dyn: Arc<dyn JobRunner> = runner.clone();

    let state = AppState {
        pool: pool.clone(),
        storage,
        runner: runner_dyn.clone(),
        dispatcher: Arc::new(JobDispatcher::new(pool, runner_dyn)),
        reconciler,
        aggregator,
    };

    let server = WebServer::new(addr, state);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("服务器运行失败: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到关停信号");
        }
    }

    // 关停作业队列：执行中的作业被停止并按取消落库
    runner.shutdown().await;
    info!("BFIT服务器已退出");
    Ok(())
}
