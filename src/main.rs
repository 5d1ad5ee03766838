//! Docent - 基于工作区文档与联网搜索的问答智能体
//!
//! 入口：初始化日志、按配置构建运行时，在标准输入上运行逐行 REPL。
//! 回答流式写到 stdout；Ctrl+C 取消当前回答且不写入历史。
//! 命令：/ingest <file>、/clear、/quit。

use std::path::{Path, PathBuf};

use anyhow::Context;
use docent::agent::AgentRuntime;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docent::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let runtime = AgentRuntime::load(config_path).context("Failed to create runtime")?;
    let namespace = runtime.config().app.namespace.clone();
    let (session_id, handle) = runtime.supervisor().create(&namespace).await;
    tracing::info!(session = %session_id, namespace = %namespace, "session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/clear" => {
                handle.lock().await.clear();
                println!("(history cleared)");
                continue;
            }
            _ => {}
        }
        if let Some(path) = line.strip_prefix("/ingest ") {
            ingest_file(&runtime, &namespace, Path::new(path.trim())).await;
            continue;
        }

        let turn = tokio::select! {
            r = runtime.process_message_stream(&handle, line, None) => r,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n(cancelled)");
                continue;
            }
        };
        let mut turn = match turn {
            Ok(t) => t,
            Err(e) => {
                eprintln!("error [{}]: {}", e.reason(), e);
                continue;
            }
        };

        loop {
            tokio::select! {
                item = turn.next() => match item {
                    Some(Ok(fragment)) => {
                        stdout.write_all(fragment.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Some(Err(e)) => {
                        eprintln!("\nerror [{}]: {}", e.reason(), e);
                        break;
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    runtime.supervisor().cancel(&session_id).await;
                }
            }
        }
        stdout.write_all(b"\n").await?;
        if turn.commit().is_none() {
            eprintln!("(turn discarded)");
        }
    }

    Ok(())
}

async fn ingest_file(runtime: &AgentRuntime, namespace: &str, path: &Path) {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match runtime.ingest(namespace, &source_name, &text).await {
        Ok(report) => println!("ingested {} ({} chunks)", report.source_name, report.chunks),
        Err(e) => eprintln!("ingest failed: {}", e),
    }
}
