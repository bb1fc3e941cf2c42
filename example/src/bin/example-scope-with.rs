use core::time::Duration;

use rust_etcd_v2_utils::{kv::DeleteOptions, Client, ClientConfig, Lock};

#[tokio::main]
async fn main() {
    let client = Client::new(ClientConfig::default().with_hosts(["localhost:2379"]))
        .expect("failed to create etcd client");

    let lock_ttl = 4;
    let mut lock = Lock::new(client.clone(), "example-lock");
    lock.acquire(true, Some(lock_ttl))
        .await
        .expect("failed to lock");

    // The keeper refreshes the entry until it is dropped or the entry vanishes.
    let keeper = lock.keep_alive(lock_ttl).expect("failed to keep lock alive");
    let lease_expired = keeper.get_lease_expire_notify();
    let lock_key = lock.lock_key().expect("lock key");

    let h = tokio::spawn(async move {
        let now = tokio::time::Instant::now();
        tokio::select! {
            _ = lease_expired.recv() => println!("Lock lost after {:?}", now.elapsed()),
            _ = async {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    println!("Subtask is still running after {:?}", now.elapsed());
                }
            } => {}
        }
    });

    println!("Press Ctrl-C to delete the lock entry and stop the subtask");
    let _ = tokio::signal::ctrl_c().await;

    // You don't want to delete the entry manually like this, this is just for demonstration purposes.
    client
        .delete(&lock_key, DeleteOptions::new())
        .await
        .expect("failed to delete lock key");

    let _ = h.await;
    drop(keeper);
    println!("Finished!");
}
