use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use gridlock_core::interface::{load_json, save_json};
use gridlock_core::oracle::DEFAULT_POINTS_PER_FEED;
use gridlock_core::proposal::{ProposalAction, ProposalManager};
use gridlock_core::release::{release_milestone, ReleaseKind, ReleaseWorkflow};
use gridlock_core::verify::{verify_milestone, VerificationPolicy};
use gridlock_core::{
    DisputeWorkflow, EscrowContract, EventSink, Evidence, GovernanceEvent, GovernanceStore,
    Ledger, MemoryStore, MockSettlementAgent, OracleDataPoint, OracleFeed, Resolution,
};

mod sink;
use sink::TracingSink;

const DEFAULT_LEDGER_PATH: &str = "./ledger.json";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let ledger_path = cli.ledger.clone();
    let store = MemoryStore::from_ledger(load_ledger(&ledger_path)?);
    let settlement = MockSettlementAgent;
    let events = TracingSink;
    let now = unix_now()?;

    match cli.command {
        Commands::Init {
            project,
            signer,
            threshold,
        } => {
            let id = store.allocate_id("esc")?;
            let contract = EscrowContract::new(id.as_str(), project.as_str(), signer, threshold, now)?;
            store.insert_contract(contract)?;
            tracing::info!("contract {id} created for project {project}");
        }
        Commands::Fund { contract, amount } => {
            let mut record = store.contract(&contract)?;
            record.credit(amount)?;
            store.update_contract(&record)?;
            events.publish(GovernanceEvent::ContractFunded {
                contract_id: contract.clone(),
                amount,
                balance: record.balance,
            });
            tracing::info!("contract {contract} funded; balance {}", record.balance);
        }
        Commands::RegisterFeed {
            id,
            project,
            max_staleness_secs,
            public_key,
            inactive,
        } => {
            let public_key = public_key
                .map(|k| decode_feed_key(&k))
                .transpose()?;
            store.insert_feed(OracleFeed {
                id: id.clone(),
                project_id: project,
                max_staleness_secs,
                public_key,
                active: !inactive,
            })?;
            tracing::info!("feed {id} registered");
        }
        Commands::Record {
            feed,
            value,
            confidence,
            timestamp,
            signature,
        } => {
            store.append_point(OracleDataPoint {
                feed_id: feed.clone(),
                value,
                confidence,
                timestamp: timestamp.unwrap_or(now),
                signature,
            })?;
            tracing::info!("point recorded for feed {feed}");
        }
        Commands::Verify {
            project,
            milestone,
            policy,
            points_per_feed,
        } => {
            let policy = match policy {
                Some(path) => load_json(&path)?,
                None => VerificationPolicy::default(),
            };
            let result = verify_milestone(
                &store,
                &events,
                &project,
                &milestone,
                &policy,
                points_per_feed,
                now,
            )?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Claim {
            contract,
            milestone,
            amount,
            recipient,
            policy,
            points_per_feed,
        } => {
            let policy = match policy {
                Some(path) => load_json(&path)?,
                None => VerificationPolicy::default(),
            };
            let record = store.contract(&contract)?;
            let result = verify_milestone(
                &store,
                &events,
                &record.project_id,
                &milestone,
                &policy,
                points_per_feed,
                now,
            )?;
            if !result.verified {
                println!("{}", serde_json::to_string_pretty(&result)?);
                anyhow::bail!("milestone {milestone} failed verification");
            }
            let receipt = release_milestone(
                &store,
                &settlement,
                &events,
                &contract,
                &result,
                amount,
                &recipient,
                now,
            )?;
            tracing::info!(
                "milestone {milestone} released; settlement {}",
                receipt.reference
            );
        }
        Commands::Proposal(cmd) => {
            let manager = ProposalManager::new(&store, &events);
            match cmd {
                ProposalCmd::Create {
                    contract,
                    action,
                    proposer,
                    expiry_secs,
                } => {
                    let action: ProposalAction = serde_json::from_str(&action)
                        .context("parsing proposal action JSON")?;
                    let p = manager.create(&contract, action, &proposer, expiry_secs, now)?;
                    tracing::info!("proposal {} created", p.id);
                }
                ProposalCmd::Approve { id, signer } => {
                    let p = manager.approve(&id, &signer, now)?;
                    tracing::info!(
                        "proposal {id}: {} of {} approvals",
                        p.current_approvals(),
                        p.required_signatures
                    );
                }
                ProposalCmd::Reject { id, actor } => {
                    manager.reject(&id, &actor, now)?;
                    tracing::info!("proposal {id} rejected");
                }
                ProposalCmd::Execute { id, executor } => {
                    manager.execute(&id, &executor, now)?;
                    tracing::info!("proposal {id} executed");
                }
            }
        }
        Commands::Release(cmd) => {
            let workflow = ReleaseWorkflow::new(&store, &settlement, &events);
            match cmd {
                ReleaseCmd::Initiate {
                    contract,
                    kind,
                    amount,
                    recipient,
                    reason,
                    delay_secs,
                    proposer,
                } => {
                    let rel = workflow.initiate(
                        &contract,
                        kind.into(),
                        amount,
                        &recipient,
                        &reason,
                        delay_secs,
                        &proposer,
                        now,
                    )?;
                    tracing::info!("release {} initiated", rel.id);
                }
                ReleaseCmd::Approve { id, signer } => {
                    let rel = workflow.approve(&id, &signer, now)?;
                    tracing::info!(
                        "release {id}: {} of {} approvals",
                        rel.current_approvals(),
                        rel.required_approvals
                    );
                }
                ReleaseCmd::Execute { id, executor } => {
                    let rel = workflow.execute(&id, &executor, now)?;
                    match rel.settlement_ref {
                        Some(reference) => {
                            tracing::info!("release {id} executed; settlement {reference}")
                        }
                        None => tracing::info!("release {id} executed"),
                    }
                }
                ReleaseCmd::Cancel { id, actor, reason } => {
                    workflow.cancel(&id, &actor, &reason, now)?;
                    tracing::info!("release {id} cancelled");
                }
            }
        }
        Commands::Dispute(cmd) => {
            let workflow = DisputeWorkflow::new(&store, &settlement, &events);
            match cmd {
                DisputeCmd::Open {
                    contract,
                    milestone,
                    initiator,
                    respondent,
                    summary,
                } => {
                    let d = workflow.open(
                        &contract,
                        milestone.as_deref(),
                        &initiator,
                        &respondent,
                        &summary,
                        now,
                    )?;
                    tracing::info!("dispute {} opened", d.id);
                }
                DisputeCmd::Evidence {
                    id,
                    submitted_by,
                    file_name,
                    file_type,
                    size_bytes,
                    uri,
                } => {
                    workflow.submit_evidence(
                        &id,
                        Evidence {
                            submitted_by,
                            file_name,
                            file_type,
                            size_bytes,
                            uri,
                            submitted_at: now,
                        },
                    )?;
                    tracing::info!("evidence added to dispute {id}");
                }
                DisputeCmd::Assign { id, arbitrator } => {
                    workflow.assign_arbitrator(&id, &arbitrator)?;
                    tracing::info!("dispute {id} assigned to {arbitrator}");
                }
                DisputeCmd::Resolve {
                    id,
                    arbitrator,
                    resolution,
                } => {
                    let resolution: Resolution = serde_json::from_str(&resolution)
                        .context("parsing resolution JSON")?;
                    workflow.resolve(&id, &arbitrator, resolution, now)?;
                    tracing::info!("dispute {id} resolved");
                }
            }
        }
        Commands::Status { contract } => {
            let record = store.contract(&contract)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    save_json(&ledger_path, &store.snapshot())?;
    Ok(())
}

fn unix_now() -> anyhow::Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the unix epoch")?;
    Ok(elapsed.as_secs() as i64)
}

fn load_ledger(path: &Path) -> anyhow::Result<Ledger> {
    if path.exists() {
        load_json(path)
    } else {
        Ok(Ledger::default())
    }
}

fn decode_feed_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(hex_key).context("feed public key must be hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("feed public key must be 32 bytes"))
}

#[derive(Parser)]
#[command(name = "gridlock-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ledger snapshot the command loads, mutates, and saves back.
    #[arg(short, long,
        global = true,
        default_value = DEFAULT_LEDGER_PATH,
        value_hint = ValueHint::FilePath)]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an escrow contract with its signer set and threshold.
    Init {
        #[arg(short, long)]
        project: String,

        /// Repeat once per authorized signer.
        #[arg(short, long, required = true)]
        signer: Vec<String>,

        #[arg(short, long)]
        threshold: u32,
    },
    /// Add contribution funds to a contract.
    Fund {
        #[arg(short, long)]
        contract: String,

        #[arg(short, long)]
        amount: u64,
    },
    /// Register an oracle feed for a project.
    RegisterFeed {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        project: String,

        #[arg(long, default_value_t = 3600)]
        max_staleness_secs: i64,

        /// Hex-encoded ed25519 public key, if the feed signs its points.
        #[arg(long)]
        public_key: Option<String>,

        #[arg(long)]
        inactive: bool,
    },
    /// Record an oracle data point.
    Record {
        #[arg(short, long)]
        feed: String,

        #[arg(short, long)]
        value: f64,

        #[arg(short, long, default_value_t = 1.0)]
        confidence: f64,

        /// Defaults to the current time.
        #[arg(short, long)]
        timestamp: Option<i64>,

        /// Hex-encoded signature over the point's canonical message.
        #[arg(short, long)]
        signature: Option<String>,
    },
    /// Aggregate a project's feeds and verify a milestone.
    Verify {
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        milestone: String,

        /// Verification policy JSON; defaults apply when omitted.
        #[arg(long, value_hint = ValueHint::FilePath)]
        policy: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_POINTS_PER_FEED)]
        points_per_feed: usize,
    },
    /// Verify a milestone and pay out its claim in one step.
    Claim {
        #[arg(short, long)]
        contract: String,

        #[arg(short, long)]
        milestone: String,

        #[arg(short, long)]
        amount: u64,

        #[arg(long)]
        recipient: String,

        /// Verification policy JSON; defaults apply when omitted.
        #[arg(long, value_hint = ValueHint::FilePath)]
        policy: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_POINTS_PER_FEED)]
        points_per_feed: usize,
    },
    /// Multi-signature proposals over contract parameters.
    #[command(subcommand)]
    Proposal(ProposalCmd),
    /// Time-locked emergency releases.
    #[command(subcommand)]
    Release(ReleaseCmd),
    /// Dispute filing and arbitration.
    #[command(subcommand)]
    Dispute(DisputeCmd),
    /// Print a contract record.
    Status {
        #[arg(short, long)]
        contract: String,
    },
}

#[derive(Subcommand)]
enum ProposalCmd {
    Create {
        #[arg(short, long)]
        contract: String,

        /// Action JSON, e.g.
        /// {"action":"parameter_change","change":{"parameter":"add_signer","signer":"auditor"}}
        #[arg(short, long)]
        action: String,

        #[arg(short, long)]
        proposer: String,

        #[arg(short, long)]
        expiry_secs: Option<i64>,
    },
    Approve {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        signer: String,
    },
    Reject {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        actor: String,
    },
    Execute {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        executor: String,
    },
}

/// Release kinds an operator may initiate; dispute resolutions are
/// created by the arbitration workflow only.
#[derive(Clone, Copy, ValueEnum)]
enum CliReleaseKind {
    Partial,
    Full,
    Suspend,
}

impl From<CliReleaseKind> for ReleaseKind {
    fn from(kind: CliReleaseKind) -> Self {
        match kind {
            CliReleaseKind::Partial => ReleaseKind::Partial,
            CliReleaseKind::Full => ReleaseKind::Full,
            CliReleaseKind::Suspend => ReleaseKind::Suspend,
        }
    }
}

#[derive(Subcommand)]
enum ReleaseCmd {
    Initiate {
        #[arg(short, long)]
        contract: String,

        #[arg(short, long, value_enum)]
        kind: CliReleaseKind,

        /// Required for partial releases.
        #[arg(short, long)]
        amount: Option<u64>,

        #[arg(long)]
        recipient: String,

        #[arg(long)]
        reason: String,

        /// Defaults to the standard 24h delay.
        #[arg(short, long)]
        delay_secs: Option<i64>,

        #[arg(short, long)]
        proposer: String,
    },
    Approve {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        signer: String,
    },
    Execute {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        executor: String,
    },
    Cancel {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        actor: String,

        #[arg(short, long)]
        reason: String,
    },
}

#[derive(Subcommand)]
enum DisputeCmd {
    Open {
        #[arg(short, long)]
        contract: String,

        #[arg(short, long)]
        milestone: Option<String>,

        #[arg(short, long)]
        initiator: String,

        #[arg(long)]
        respondent: String,

        #[arg(short, long)]
        summary: String,
    },
    Evidence {
        #[arg(long)]
        id: String,

        #[arg(long)]
        submitted_by: String,

        #[arg(long)]
        file_name: String,

        #[arg(long)]
        file_type: String,

        #[arg(long)]
        size_bytes: u64,

        #[arg(long)]
        uri: String,
    },
    Assign {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        arbitrator: String,
    },
    Resolve {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        arbitrator: String,

        /// Resolution JSON, e.g.
        /// {"kind":"fund_release","amount":400,"recipient":"funder","notes":"refund"}
        #[arg(short, long)]
        resolution: String,
    },
}
