use nodesync::prelude::*;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Fair lock over an in-memory ensemble");
    println!("====================================\n");

    let ensemble = MemoryEnsemble::new();

    demo_queue_order(&ensemble).await?;
    demo_holder_crash(&ensemble).await?;
    demo_value_store(&ensemble).await?;

    Ok(())
}

async fn demo_queue_order(ensemble: &MemoryEnsemble) -> Result<()> {
    println!("Demo 1: five workers, one lock");
    println!("------------------------------");

    let mut workers = Vec::new();
    for id in 0..5 {
        let sync = NodeSync::new(Arc::new(ensemble.connect()), "/demo").await?;
        let ticket = sync.enqueue("locks/printer").await?;
        println!("worker {} queued as {}", id, ticket.name());
        workers.push((id, sync, ticket));
    }

    let mut handles = Vec::new();
    for (id, sync, ticket) in workers.into_iter().rev() {
        handles.push(tokio::spawn(async move {
            sync.await_head(&ticket).await?;
            println!("worker {} holds the lock", id);
            sleep(Duration::from_millis(20)).await;
            sync.release(ticket).await
        }));
    }
    for handle in handles {
        handle.await.map_err(|e| Error::Other(e.into()))??;
    }
    println!();
    Ok(())
}

async fn demo_holder_crash(ensemble: &MemoryEnsemble) -> Result<()> {
    println!("Demo 2: the holder's session dies");
    println!("---------------------------------");

    let holder_session = Arc::new(ensemble.connect());
    let holder = NodeSync::new(holder_session.clone(), "/demo").await?;
    let waiter = NodeSync::new(Arc::new(ensemble.connect()), "/demo").await?;

    let held = holder.lock("locks/printer").await?;
    println!("holder owns {}", held.name());

    let queued = waiter.enqueue("locks/printer").await?;
    let handle = tokio::spawn(async move {
        waiter.await_head(&queued).await?;
        println!("waiter took over with {}", queued.name());
        waiter.release(queued).await
    });

    sleep(Duration::from_millis(50)).await;
    println!("expiring holder session {}", holder_session.id());
    ensemble.expire(holder_session.id());

    handle.await.map_err(|e| Error::Other(e.into()))??;
    println!();
    Ok(())
}

async fn demo_value_store(ensemble: &MemoryEnsemble) -> Result<()> {
    println!("Demo 3: fetch and set");
    println!("---------------------");

    let sync = NodeSync::new(Arc::new(ensemble.connect()), "/demo").await?;
    for value in ["blue", "green"] {
        let old = sync.fetch_and_set("settings", "color", value).await?;
        println!(
            "color set to {} (was {:?})",
            value,
            String::from_utf8_lossy(&old)
        );
    }
    let current = sync.fetch("settings", "color").await?;
    println!("color is {}", String::from_utf8_lossy(&current));
    Ok(())
}
