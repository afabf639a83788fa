//! Runner: wires parsed arguments to a session and the local filesystem

use crate::cli::args::{Args, Command, STDIO_PATH};
use crate::config::ClientOptions;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::Session;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    output: Logger,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };

        Self {
            args,
            output,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let cancel = self.cancel.clone();
        let output = self.output.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                output.warning("Interrupted, cancelling");
                cancel.cancel();
            }
        });

        let result = self.dispatch().await;
        interrupt.abort();
        if let Err(err) = &result {
            self.output.error(&err.to_string());
        }
        result
    }

    async fn dispatch(&self) -> Result<()> {
        let options = ClientOptions::new()
            .with_auth(self.args.auth_config())
            .with_insecure(self.args.insecure)
            .with_logger(self.output.clone());

        self.output.section("Image Layer");
        let session = Session::open(self.args.command.reference(), options, &self.cancel).await?;

        match &self.args.command {
            Command::Put { path, .. } => self.put(&session, path).await,
            Command::Get { path, .. } => self.get(&session, path).await,
        }
    }

    async fn put(&self, session: &Session, path: &str) -> Result<()> {
        let descriptor = if path == STDIO_PATH {
            let mut stdin = tokio::io::stdin();
            session.put(&mut stdin, &self.cancel).await?
        } else {
            let mut file = File::open(path)
                .await
                .map_err(|e| RegistryError::Io(format!("Failed to open {}: {}", path, e)))?;
            session.put(&mut file, &self.cancel).await?
        };

        self.output.info(&format!("Digest: {}", descriptor.digest));
        self.output.info(&format!("Size: {}", self.output.format_size(descriptor.size)));
        Ok(())
    }

    async fn get(&self, session: &Session, path: &str) -> Result<()> {
        // Resolve before touching the destination so a failed lookup leaves no file behind
        let mut reader = session.get(&self.cancel).await?;

        let copied = if path == STDIO_PATH {
            let mut stdout = tokio::io::stdout();
            reader.copy_to(&mut stdout, &self.cancel).await?
        } else {
            let mut file = File::create(path)
                .await
                .map_err(|e| RegistryError::Io(format!("Failed to create {}: {}", path, e)))?;
            reader.copy_to(&mut file, &self.cancel).await?
        };
        reader.close();

        self.output.success(&format!(
            "Wrote {} to {}",
            self.output.format_size(copied),
            if path == STDIO_PATH { "stdout" } else { path }
        ));
        Ok(())
    }
}
