use clap::{Parser, Subcommand};

/// credgate: issue, approve and revoke service credentials
#[derive(Parser)]
#[command(name = "credgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (overrides CREDGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage credentials directly against the database
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Inspect the effective policy ruleset
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Request a credential (issued now, or parked for approval)
    Create {
        #[arg(long)]
        principal: String,
        /// Credential type (defaults to the first allowed type)
        #[arg(long = "type")]
        kind: Option<String>,
        /// Requested scope; repeat or comma-separate for several
        #[arg(long = "scope", value_delimiter = ',')]
        scopes: Vec<String>,
        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<i64>,
        /// Secret length in characters
        #[arg(long)]
        length: Option<i64>,
    },
    /// List every credential, oldest first
    List,
    /// Approve a pending request and print its secret
    Approve { id: String },
    /// Revoke a credential
    Revoke { id: String },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Print the effective ruleset as YAML
    Show,
}
