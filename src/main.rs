// src/main.rs

use dwf_prepipe::{cli, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run(cli::parse()).await {
        eprintln!("dwf-prepipe error: {err:?}");
        std::process::exit(1);
    }
}
