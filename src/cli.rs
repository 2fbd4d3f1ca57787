use clap::{Parser, Subcommand};
use uuid::Uuid;

/// flagctl — manage feature flags in a remote flag store
#[derive(Parser)]
#[command(name = "flagctl", version, about)]
pub struct Cli {
    /// API root of the flag store (overrides FLAGCTL_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List active flags
    List,

    /// Show a single flag
    Show { id: Uuid },

    /// Create a new flag
    Create {
        #[arg(long)]
        technical_name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Local time, e.g. 2025-01-31T18:00
        #[arg(long)]
        expires_on: Option<String>,
        #[arg(long)]
        inverted: bool,
        /// Restrict the flag to these customers
        #[arg(long, value_delimiter = ',')]
        customers: Option<Vec<String>>,
    },

    /// Edit an existing flag
    Update {
        id: Uuid,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Local time, e.g. 2025-01-31T18:00
        #[arg(long, conflicts_with = "no_expiry")]
        expires_on: Option<String>,
        /// Remove the expiry
        #[arg(long)]
        no_expiry: bool,
        #[arg(long)]
        toggle_inverted: bool,
        /// Replace the customer scope
        #[arg(long, value_delimiter = ',', conflicts_with = "all_customers")]
        customers: Option<Vec<String>>,
        /// Apply the flag to every customer
        #[arg(long)]
        all_customers: bool,
    },

    /// Archive a flag (cannot be undone)
    Archive { id: Uuid },

    /// Add customers to a flag's scope
    AddCustomers {
        id: Uuid,
        #[arg(value_delimiter = ',', required = true)]
        customers: Vec<String>,
    },

    /// Evaluate flags for a customer
    Request {
        #[arg(long)]
        customer: String,
        #[arg(required = true)]
        names: Vec<String>,
    },
}
