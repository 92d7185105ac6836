use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod aggregate;
mod db;
mod error;
mod models;
mod report;
mod tree;

use models::GradeScale;

#[derive(Parser)]
#[command(name = "grade-tracker")]
#[command(about = "Hierarchical weighted grade tracker for Group Scholar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import enrollment records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print an enrollment's grade forest as JSON
    Show {
        #[arg(long)]
        enrollment: Uuid,
    },
    /// Add a top-level grade component
    AddRoot {
        #[arg(long)]
        enrollment: Uuid,
        #[arg(long)]
        name: String,
        /// Defaults to the unassigned share of the root weights
        #[arg(long)]
        weight: Option<f64>,
    },
    /// Add a child component under an existing one
    AddChild {
        #[arg(long)]
        parent: Uuid,
        #[arg(long)]
        name: String,
        /// Defaults to the unassigned share among its siblings
        #[arg(long)]
        weight: Option<f64>,
    },
    /// Enter a raw score on a leaf component
    SetScore {
        #[arg(long)]
        node: Uuid,
        #[arg(long)]
        score: f64,
    },
    /// Delete a component and its entire subtree
    Delete {
        #[arg(long)]
        node: Uuid,
    },
    /// Show the estimated final grade for an enrollment
    Estimate {
        #[arg(long)]
        enrollment: Uuid,
    },
    /// Freeze the current estimate as the authoritative final grade
    Complete {
        #[arg(long)]
        enrollment: Uuid,
    },
    /// Credit-weighted cumulative GPA across all enrollments
    Gpa {
        #[arg(long, default_value = "10")]
        scale: String,
    },
    /// Generate a markdown report
    Report {
        /// Gradebook for one enrollment; omit for the full transcript
        #[arg(long)]
        enrollment: Option<Uuid>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let upserted = db::import_enrollments(&pool, &csv).await?;
            println!("Upserted {upserted} enrollments from {}.", csv.display());
        }
        Commands::Show { enrollment } => {
            let tree = db::load_tree(&pool, enrollment).await?;
            println!("{}", serde_json::to_string_pretty(&tree.to_forest())?);
        }
        Commands::AddRoot {
            enrollment,
            name,
            weight,
        } => {
            let entry = db::add_root(&pool, enrollment, &name, weight).await?;
            println!(
                "Added root component \"{}\" with weight {:.2}.",
                entry.name, entry.weight
            );
            if let Some(id) = entry.id {
                println!("Component id: {id}");
            }
        }
        Commands::AddChild {
            parent,
            name,
            weight,
        } => {
            let entry = db::add_child(&pool, parent, &name, weight).await?;
            println!(
                "Added component \"{}\" with weight {:.2} under {parent}.",
                entry.name, entry.weight
            );
            if let Some(id) = entry.id {
                println!("Component id: {id}");
            }
        }
        Commands::SetScore { node, score } => {
            let entry = db::set_leaf_score(&pool, node, score).await?;
            println!("Recorded score {score:.2} on \"{}\".", entry.name);
        }
        Commands::Delete { node } => {
            db::delete_node(&pool, node).await?;
            println!("Deleted component {node} and its subtree.");
        }
        Commands::Estimate { enrollment } => {
            let tree = db::load_tree(&pool, enrollment).await?;
            let estimate = aggregate::estimate_final_grade(&tree);
            println!(
                "Estimated grade: {:.2} ({}, {:.1} on the 4.0 scale)",
                estimate,
                aggregate::letter_grade(estimate),
                aggregate::to_scale4(estimate)
            );
            let remaining = tree.remaining_weight(None)?;
            if remaining > 0.0 {
                println!("Unassigned root weight: {remaining:.2}");
            }
        }
        Commands::Complete { enrollment } => {
            let updated = db::complete_enrollment(&pool, enrollment).await?;
            if let (Some(final_score), Some(letter)) =
                (updated.final_score, updated.letter_grade.as_deref())
            {
                println!(
                    "Completed {}: final grade {final_score:.2} ({letter}).",
                    updated.course_code
                );
            }
        }
        Commands::Gpa { scale } => {
            let scale = match scale.as_str() {
                "4" => GradeScale::Scale4,
                "10" => GradeScale::Scale10,
                other => anyhow::bail!("unknown scale {other:?}; use 4 or 10"),
            };
            let enrollments = db::fetch_enrollments(&pool).await?;
            let gpa = aggregate::cumulative_gpa(&enrollments, scale);
            let label = match scale {
                GradeScale::Scale4 => "4.0",
                GradeScale::Scale10 => "10-point",
            };
            println!("Cumulative GPA ({label} scale): {gpa:.2}");
        }
        Commands::Report { enrollment, out } => {
            let report = match enrollment {
                Some(id) => {
                    let record = db::fetch_enrollment(&pool, id).await?;
                    let tree = db::load_tree(&pool, id).await?;
                    report::build_gradebook(&record, &tree)
                }
                None => {
                    let enrollments = db::fetch_enrollments(&pool).await?;
                    report::build_transcript(&enrollments)
                }
            };
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
