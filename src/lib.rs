pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod setup;

use agent::CookingAssistant;
use cli::{ Args, Command };
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

fn log_configuration(args: &Args) {
    info!("--- Core Configuration ---");
    info!("Raw Data Dir: {}", args.raw_data_dir);
    info!("Processed Data Dir: {}", args.processed_data_dir);
    info!("Vector Store Type: {}", args.vector_type);
    info!("Vector Store Host: {}", args.host);
    info!("Vector Collection: {}", args.collection);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Embedding LLM Type: {}", args.embedding_llm_type);
    info!("History Store Type: {}", args.history_type);
    info!("Prompts Path: {}", args.prompts_path);
    info!("Retrieved Documents: {}", args.rag_default_limit);
    info!("Cache Enabled: {}", args.enable_cache);
    if args.enable_cache {
        info!("Cache Redis URL: {}", args.cache_redis_url);
    }
    info!("-------------------------");
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    log_configuration(&args);

    match args.command() {
        Command::Setup { reset } => {
            let report = setup::run_setup(&args, reset).await?;
            info!(
                "Indexed {} chunks ({} before splitting) in {} batches",
                report.stored_chunks,
                report.raw_chunks,
                report.batches
            );
        }
        Command::Ask { question } => {
            let assistant = CookingAssistant::new(&args).await?;
            let turn = assistant.respond(&Uuid::new_v4().to_string(), &question).await;
            println!("{}", turn.response);
            if let Some(err) = turn.error {
                return Err(err.into());
            }
        }
        Command::Serve => {
            let assistant = Arc::new(CookingAssistant::new(&args).await?);
            info!("Starting server on: {}", args.server_addr);
            let server = Server::new(
                args.server_addr.clone(),
                args.http_port,
                args.server_api_key.clone(),
                assistant
            );
            server.run().await?;
        }
    }

    Ok(())
}
