#![allow(dead_code)]
// Each integration test binary uses a different subset of the stubs

pub mod config;
pub mod session;

use std::time::Duration;

/// Poll `cond` until it holds, failing the test after a few seconds
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
