//! Queue CLI subcommands for inspecting and clearing deferred operations.

use anyhow::Result;
use clap::Subcommand;

use crate::core::QueueStore;
use crate::domain::QueueName;

/// Queue-related subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List pending items of a queue, oldest first
    List {
        /// Queue name (search-retry, save, remove)
        queue: QueueName,
    },

    /// Drop every pending item of a queue
    Clear {
        /// Queue name (search-retry, save, remove)
        queue: QueueName,
    },
}

pub async fn execute(command: QueueCommands) -> Result<()> {
    let store = QueueStore::open_default().await?;

    match command {
        QueueCommands::List { queue } => list(&store, queue).await,
        QueueCommands::Clear { queue } => clear(&store, queue).await,
    }
}

async fn list(store: &QueueStore, queue: QueueName) -> Result<()> {
    let items = store.peek_all(queue).await?;

    if items.is_empty() {
        println!("Queue '{}' is empty", queue);
        return Ok(());
    }

    for (index, item) in items.iter().enumerate() {
        println!("{:>4}  {}", index + 1, item);
    }
    println!("\nTotal: {} item(s)", items.len());
    Ok(())
}

async fn clear(store: &QueueStore, queue: QueueName) -> Result<()> {
    let pending = store.len(queue).await?;
    store.clear(queue).await?;
    store.compact().await?;

    eprintln!("Cleared {} item(s) from '{}'", pending, queue);
    Ok(())
}
