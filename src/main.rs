//! claim-engine CLI
//!
//! Run the reconciliation and claim pipeline from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Generate claims for every delivered consignment in a fleet file
//! claim-engine process --input fleet.json
//!
//! # Output as JSON
//! claim-engine process --input fleet.json --format json
//!
//! # Apply a regulator response to submitted claims
//! claim-engine settle --input settlement.json
//!
//! # Generate a random fleet for testing
//! claim-engine generate --consignments 100 --seed 7 --output fleet.json
//! ```

use claim_engine::claims::claim::Claim;
use claim_engine::core::config::EngineConfig;
use claim_engine::core::events::NullSink;
use claim_engine::core::reference::PricingWindow;
use claim_engine::pipeline::engine::{ClaimEngine, ProcessOptions, Submission};
use claim_engine::pipeline::scheduler::{Scheduler, SweepReport};
use claim_engine::settlement::processor::{BankPayment, Settlement, SettlementProcessor};
use claim_engine::settlement::regulator::{OutboxGateway, RegulatorGateway, RegulatorResponse};
use claim_engine::simulation::fleet::{generate_fleet, Fleet, FleetConfig};
use chrono::Utc;
use rust_decimal::Decimal;
use std::fs;
use std::process;
use std::sync::Arc;

fn print_usage() {
    eprintln!(
        r#"claim-engine — three-way reconciliation and UPPF claim settlement

USAGE:
    claim-engine <COMMAND> [OPTIONS]

COMMANDS:
    process     Validate deliveries, generate claims and build submissions
    settle      Apply a regulator response to a batch of submitted claims
    config      Print the default engine configuration
    generate    Generate a random fleet of deliveries (for testing)
    help        Show this message

OPTIONS (process, settle):
    --input <FILE>      Path to JSON input file
    --config <FILE>     Engine configuration (default: built-in, or $CLAIM_ENGINE_CONFIG)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (process):
    --skip-validation   Use neutral GPS scores instead of validating traces
    --strict            Fail deliveries that do not validate instead of recording rejected claims

OPTIONS (generate):
    --consignments <N>  Number of consignments (default: 50)
    --routes <N>        Number of routes (default: 8)
    --seed <N>          Seed for a reproducible fleet
    --output <FILE>     Write to file instead of stdout

ENVIRONMENT:
    RUST_LOG            Log filter (default: warn)

EXAMPLES:
    claim-engine generate --consignments 20 --seed 1 --output fleet.json
    claim-engine process --input fleet.json
    claim-engine process --input fleet.json --format json --strict
    claim-engine settle --input settlement.json --config engine.json"#
    );
}

/// Input of the `settle` command.
#[derive(serde::Deserialize)]
struct SettleInput {
    window: PricingWindow,
    claims: Vec<Claim>,
    response: RegulatorResponse,
    /// Bank receipt to reconcile against the net settlement.
    #[serde(default)]
    payment: Option<BankPayment>,
}

/// JSON output of the `process` command.
#[derive(serde::Serialize)]
struct ProcessOutput<'a> {
    sweep: &'a SweepReport,
    total_amount: String,
    claims: Vec<Claim>,
    submissions: &'a [Submission],
}

#[derive(serde::Serialize)]
struct SettleOutput<'a> {
    settlement: &'a Settlement,
    claims: &'a [Claim],
}

/// Options shared by `process` and `settle`.
struct CommonArgs {
    input_path: Option<String>,
    config_path: Option<String>,
    format: String,
    skip_validation: bool,
    strict: bool,
}

fn parse_common(args: &[String], allow_process_flags: bool) -> CommonArgs {
    let mut parsed = CommonArgs {
        input_path: None,
        config_path: None,
        format: "text".to_string(),
        skip_validation: false,
        strict: false,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                parsed.input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--config" => {
                i += 1;
                parsed.config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                parsed.format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            "--skip-validation" if allow_process_flags => parsed.skip_validation = true,
            "--strict" if allow_process_flags => parsed.strict = true,
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }
    parsed
}

fn load_config(path: Option<&str>) -> EngineConfig {
    let loaded = match path {
        Some(p) => EngineConfig::from_file(p),
        None => EngineConfig::from_env(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error loading configuration: {}", e);
        process::exit(1);
    })
}

fn load_json<T: serde::de::DeserializeOwned>(path: &str, expected: &str) -> T {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });

    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing JSON: {}", e);
        eprintln!("Expected format:");
        eprintln!("{}", expected);
        process::exit(1);
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing output: {}", e);
        process::exit(1);
    })
}

const FLEET_FORMAT: &str = r#"{
  "reference": { "equalisation_points": { ... }, "windows": [ ... ] },
  "consignments": [ { "id": "CNS-00001", "route_id": "ROUTE-01", ... } ],
  "traces": [ { "consignment_id": "CNS-00001", "points": [ ... ] } ],
  "evidence": [ { "consignment_id": "CNS-00001", "waybill": "...", ... } ]
}
(run `claim-engine generate` for a complete example)"#;

const SETTLE_FORMAT: &str = r#"{
  "window": { "id": "W-2025-01-01", "start": "2025-01-01", "end": "2025-01-14" },
  "claims": [ ... claims as printed by `process --format json` ... ],
  "response": {
    "response_ref": "NPA-RESP-1",
    "approved_claims": [ { "claim_number": "UPPF-...", "approved_amount": "1000.00", "settlement_date": "2025-02-01" } ],
    "rejected_claims": [ { "claim_number": "UPPF-...", "reason": "..." } ]
  },
  "payment": { "reference": "BANK-1", "amount": "1000.00", "received_on": "2025-02-03" }
}"#;

fn cmd_process(args: &[String]) {
    let parsed = parse_common(args, true);
    let path = parsed.input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });

    let config = load_config(parsed.config_path.as_deref());
    let fleet: Fleet = load_json(&path, FLEET_FORMAT);
    let engine: ClaimEngine = fleet.builder(config).build().unwrap_or_else(|e| {
        eprintln!("Error building engine: {}", e);
        process::exit(1);
    });

    let scheduler = Scheduler::new(Arc::new(engine));
    let options = ProcessOptions {
        skip_validation: parsed.skip_validation,
        strict: parsed.strict,
    };
    let sweep = scheduler.sweep_deliveries(options);

    let engine = scheduler.engine();
    let gateway: Arc<dyn RegulatorGateway> = Arc::new(OutboxGateway::new());
    let mut submissions = Vec::new();
    for window in engine.reference_data().windows() {
        match engine.build_submission(&window.id, &gateway) {
            Ok(Some(submission)) => submissions.push(submission),
            Ok(None) => {}
            Err(e) => {
                eprintln!("Error submitting window {}: {}", window.id, e);
                process::exit(1);
            }
        }
    }

    let claims = engine.claims().all();
    let total: Decimal = claims.iter().map(|c| c.total_amount()).sum();

    if parsed.format == "json" {
        let output = ProcessOutput {
            sweep: &sweep,
            total_amount: total.to_string(),
            claims,
            submissions: &submissions,
        };
        println!("{}", to_json(&output));
        return;
    }

    println!("Deliveries swept: {}", sweep.attempted);
    println!("  Claims generated:  {}", sweep.generated);
    println!("  Not claimable:     {}", sweep.terminal.len());
    println!("  Deferred:          {}", sweep.deferred.len());
    for id in &sweep.terminal {
        if let Some(reason) = scheduler.terminal_reason(id) {
            println!("    {}: {}", id, reason);
        }
    }

    println!("\nClaims:");
    for claim in &claims {
        println!(
            "  {}  {:<10} {:>8} km  {:>12}  {:<24} {:?}",
            claim.claim_number(),
            claim.consignment_id(),
            claim.km_beyond_equalisation(),
            claim.total_amount(),
            claim.status(),
            claim.priority()
        );
    }
    println!("  Total claimed: {}", total);

    if submissions.is_empty() {
        println!("\nNo submissions built.");
    }
    for submission in &submissions {
        println!(
            "\nSubmission {} ({}): {} claims, {} total",
            submission.batch.submission_id,
            submission.receipt.reference,
            submission.batch.claims.len(),
            submission.batch.total_amount()
        );
    }
}

fn cmd_settle(args: &[String]) {
    let parsed = parse_common(args, false);
    let path = parsed.input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });

    let config = load_config(parsed.config_path.as_deref());
    let mut input: SettleInput = load_json(&path, SETTLE_FORMAT);

    let processor = SettlementProcessor::new(config.settlement, config.gl);
    let mut settlement = processor
        .process(&input.window, &mut input.claims, &input.response, &NullSink, Utc::now())
        .unwrap_or_else(|e| {
            eprintln!("Error settling {}: {}", input.response.response_ref, e);
            process::exit(1);
        });
    if let Some(payment) = &input.payment {
        settlement = processor
            .reconcile_payment(settlement.settlement_id(), payment, &NullSink, Utc::now())
            .unwrap_or_else(|e| {
                eprintln!("Error reconciling payment {}: {}", payment.reference, e);
                process::exit(1);
            });
    }

    if parsed.format == "json" {
        let output = SettleOutput {
            settlement: &settlement,
            claims: &input.claims,
        };
        println!("{}", to_json(&output));
        return;
    }

    println!("Settlement {} ({:?})", settlement.settlement_id(), settlement.status());
    println!("  Claims:        {} settled, {} rejected of {}", settlement.settled_claims(), settlement.rejected_claims(), settlement.total_claims());
    println!("  Claimed:       {}", settlement.total_claimed());
    println!("  Settled:       {}", settlement.total_settled());
    println!("  Variance:      {}", settlement.total_variance());
    println!(
        "  Penalties:     {}{}",
        settlement.npa_penalties(),
        if settlement.adjustments_estimated() { " (estimated)" } else { "" }
    );
    println!("  Bonuses:       {}", settlement.performance_bonuses());
    println!("  Net:           {}", settlement.net_settlement());
    if let Some(p) = settlement.payment_reconciliation() {
        println!(
            "  Bank payment:  {} received {} ({}%, {:?})",
            p.bank_reference, p.received_amount, p.variance_pct, p.status
        );
        for cause in &p.possible_causes {
            println!("    - {}", cause);
        }
        for action in &p.recommended_actions {
            println!("    > {}", action);
        }
    }

    let metrics = settlement.metrics();
    println!("\nPerformance:");
    println!("  Success rate:          {:.1}%", metrics.success_rate);
    println!("  Avg processing days:   {:.1}", metrics.average_processing_days);
    println!("  Compliance score:      {:.1}", metrics.compliance_score);
    println!("  Settlement efficiency: {:.1}%", metrics.settlement_efficiency);

    let flagged: Vec<_> = settlement.variance_records().iter().filter(|r| r.action_required).collect();
    if !flagged.is_empty() {
        println!("\nVariances needing action:");
        for r in flagged {
            println!(
                "  {}  claimed {}  paid {}  ({}%, {:?})",
                r.claim_number, r.original_amount, r.settled_amount, r.variance_pct, r.risk_category
            );
        }
    }
    for r in settlement.rejected() {
        println!("  Rejected {}: {}", r.claim_number, r.reason);
    }
    for number in settlement.unmatched_claims() {
        println!("  Unmatched in response: {}", number);
    }
}

fn cmd_config(args: &[String]) {
    if let Some(arg) = args.first() {
        eprintln!("Unknown option: {}", arg);
        process::exit(1);
    }
    println!("{}", to_json(&EngineConfig::default()));
}

fn cmd_generate(args: &[String]) {
    let mut config = FleetConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--consignments" => {
                i += 1;
                config.consignment_count = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--consignments requires a number");
                        process::exit(1);
                    });
            }
            "--routes" => {
                i += 1;
                config.route_count = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--routes requires a number");
                        process::exit(1);
                    });
            }
            "--seed" => {
                i += 1;
                config.seed = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--seed requires a number");
                    process::exit(1);
                }));
            }
            "--output" => {
                i += 1;
                output_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--output requires a file path");
                    process::exit(1);
                }));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let fleet = generate_fleet(&config);
    let json = to_json(&fleet);

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!(
            "Generated {} consignments across {} routes → {}",
            fleet.consignments.len(),
            config.route_count,
            path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "process" => cmd_process(rest),
        "settle" => cmd_settle(rest),
        "config" => cmd_config(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
