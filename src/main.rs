use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flagctl::expiry;
use flagctl::{FeatureFlag, FlagEdit, FlagRepository, HttpFlagRepository, LifecycleController};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = cli::Cli::parse();
    let cfg = flagctl::config::load(args.base_url.as_deref())?;

    let repo: Arc<dyn FlagRepository> = Arc::new(
        HttpFlagRepository::new(cfg.base_url.clone(), cfg.timeout, cfg.connect_timeout)
            .context("failed to build flag store client")?,
    );
    tracing::debug!(base_url = %cfg.base_url, "flag store configured");

    handle_command(args.command, repo).await
}

/// Logs go to stderr so command output on stdout stays pipeable.
fn init_tracing() {
    let json = std::env::var("FLAGCTL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (plain_layer, json_layer) = if json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "flagctl=info".into()),
        ))
        .with(plain_layer)
        .with(json_layer)
        .init();
}

async fn handle_command(cmd: cli::Commands, repo: Arc<dyn FlagRepository>) -> anyhow::Result<()> {
    match cmd {
        cli::Commands::List => {
            let flags = repo.list().await?;
            if flags.is_empty() {
                println!("No flags found.");
            } else {
                println!(
                    "{:<38} {:<28} {:<9} {:<20} {:<10}",
                    "ID", "TECHNICAL NAME", "INVERTED", "EXPIRES", "SCOPE"
                );
                for f in flags {
                    println!(
                        "{:<38} {:<28} {:<9} {:<20} {:<10}",
                        f.id.map(|id| id.to_string()).unwrap_or_default(),
                        f.technical_name,
                        f.inverted,
                        expiry::to_editable(f.expires_on).unwrap_or_else(|| "never".into()),
                        scope_label(&f),
                    );
                }
            }
        }
        cli::Commands::Show { id } => {
            let flag = repo.fetch_one(id).await?;
            print_flag(&flag);
        }
        cli::Commands::Create {
            technical_name,
            display_name,
            description,
            expires_on,
            inverted,
            customers,
        } => {
            let draft = FeatureFlag {
                display_name,
                description,
                expires_on: expiry::from_editable(expires_on.as_deref())?,
                inverted,
                customer_ids: customers,
                ..FeatureFlag::draft(technical_name)
            };

            let session = LifecycleController::new(repo);
            session.open_new(draft)?;
            let created = session.save().await?;
            println!("Flag created.");
            print_flag(&created);
        }
        cli::Commands::Update {
            id,
            display_name,
            description,
            expires_on,
            no_expiry,
            toggle_inverted,
            customers,
            all_customers,
        } => {
            let session = LifecycleController::new(repo);
            session.open(id).await?;

            if let Some(name) = display_name {
                session.apply(FlagEdit::SetDisplayName(non_blank(name)))?;
            }
            if let Some(text) = description {
                session.apply(FlagEdit::SetDescription(non_blank(text)))?;
            }
            if no_expiry {
                session.apply(FlagEdit::SetExpiresOn(None))?;
            } else if let Some(text) = expires_on {
                session.set_expiry_local(Some(&text))?;
            }
            if toggle_inverted {
                session.apply(FlagEdit::ToggleInverted)?;
            }
            if all_customers {
                session.apply(FlagEdit::SetCustomerIds(None))?;
            } else if let Some(ids) = customers {
                session.apply(FlagEdit::SetCustomerIds(Some(ids)))?;
            }

            if !session.is_dirty() {
                println!("Nothing to change.");
                return Ok(());
            }

            match session.save().await {
                Ok(updated) => {
                    println!("Flag updated.");
                    print_flag(&updated);
                }
                Err(e) if e.is_conflict() => {
                    anyhow::bail!("{}; run `flagctl show {}` and apply your change again", e, id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        cli::Commands::Archive { id } => {
            let session = LifecycleController::new(repo);
            let flag = session.open(id).await?;
            session.archive().await?;
            println!("Flag '{}' archived.", flag.technical_name);
        }
        cli::Commands::AddCustomers { id, customers } => {
            repo.add_customers(id, &customers).await?;
            println!("Added {} customer(s) to {}.", customers.len(), id);
        }
        cli::Commands::Request { customer, names } => {
            let features = repo.request_as_customer(&customer, &names).await?;
            println!("{:<28} {:<8} {:<9} {:<8}", "NAME", "ACTIVE", "INVERTED", "EXPIRED");
            for f in features {
                println!(
                    "{:<28} {:<8} {:<9} {:<8}",
                    f.name, f.active, f.inverted, f.expired
                );
            }
        }
    }
    Ok(())
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn scope_label(f: &FeatureFlag) -> String {
    match f.normalized_customer_ids() {
        None => "all".to_string(),
        Some(ids) => format!("{} customer(s)", ids.len()),
    }
}

fn print_flag(f: &FeatureFlag) {
    let now = chrono::Utc::now();
    println!("  ID:             {}", f.id.map(|id| id.to_string()).unwrap_or_default());
    println!("  Technical name: {}", f.technical_name);
    println!("  Display name:   {}", f.display_name.as_deref().unwrap_or("-"));
    println!("  Description:    {}", f.description.as_deref().unwrap_or("-"));
    println!("  Inverted:       {}", f.inverted);
    println!(
        "  Expires:        {}{}",
        expiry::to_editable(f.expires_on).unwrap_or_else(|| "never".into()),
        if f.is_expired_at(now) { " (expired)" } else { "" }
    );
    match f.normalized_customer_ids() {
        Some(ids) => println!("  Customers:      {}", ids.join(", ")),
        None => println!("  Customers:      all"),
    }
    println!("  Created:        {}", f.created_at.to_rfc3339());
    println!("  Updated:        {}", f.updated_at.to_rfc3339());
    if f.archived {
        println!("  Archived:       yes");
    }
}
