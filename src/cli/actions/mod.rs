pub mod check_smtp;
pub mod server;

// Internal "interpreter" for `Action`.
// The match lives in run.rs so this module only declares the variants.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    CheckSmtp(check_smtp::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
