use core::time::Duration;

use rust_etcd_v2_utils::{Client, ClientConfig, Lock};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let client = Client::new(ClientConfig::default().with_hosts(["localhost:2379"]))
        .expect("failed to create etcd client");

    let lock_name = "example-lock";
    let lock_ttl = Some(30);

    let mut lock = Lock::new(client.clone(), lock_name);
    assert!(lock.acquire(true, lock_ttl).await.expect("failed to lock"));
    println!("Lock acquired in main task with key {}!", lock.lock_key().expect("lock key"));

    let h = tokio::spawn(async move {
        let mut lock2 = Lock::new(client, lock_name);
        lock2.acquire(true, lock_ttl).await.expect("failed to lock");
        println!("Lock acquired in task 2!");
        lock2.release().await.expect("failed to release");
    });

    println!("Sleeping for 5 second...");
    for i in 1..=5 {
        println!("{}...", i);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("Releasing lock!");
    lock.release().await.expect("failed to release");

    println!("Waiting for task 2 to acquire lock...");
    h.await.expect("task 2 failed to acquire lock");
    println!("Finished!");
}
