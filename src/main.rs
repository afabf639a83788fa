use clap::Parser;
use image_layer::cli::{Args, Runner};
use std::process;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let runner = Runner::new(args);

    // The runner has already reported the error
    if runner.run().await.is_err() {
        process::exit(1);
    }
}
