use anyhow::{anyhow, Context, Result};
use bac_orientation::analyzer::{ProgramFilter, RecommendationFilter, SortOrder};
use bac_orientation::catalog::{find_program, load_catalog};
use bac_orientation::models::{ComparisonAnalysis, Config, StudentProfile};
use bac_orientation::orchestrator::{ComparisonOrchestrator, OrchestratorSettings};
use bac_orientation::score::{compute_score, score_level, Grades, Track};
use bac_orientation::store::{ComparisonStore, FileStore};
use bac_orientation::HttpGenerator;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn cli() -> Command {
    Command::new("bac-orientation")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Computes BAC admission scores and compares university programs")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("score")
                .about("Compute MG, FB, FS and FG from grades")
                .arg(Arg::new("track").long("track").value_name("TRACK"))
                .arg(
                    Arg::new("grade")
                        .long("grade")
                        .value_name("SUBJECT=GRADE")
                        .action(ArgAction::Append)
                        .help("Subject grade, repeatable (e.g. --grade math=15.5)"),
                )
                .arg(Arg::new("grades").long("grades").value_name("FILE").help("TOML table of grades"))
                .arg(Arg::new("profile").long("profile").value_name("FILE").help("Student profile TOML")),
        )
        .subcommand(
            Command::new("rank")
                .about("Rank catalog programs against a score")
                .arg(Arg::new("score").long("score").value_name("FG").value_parser(clap::value_parser!(f64)))
                .arg(Arg::new("profile").long("profile").value_name("FILE"))
                .arg(Arg::new("catalog").long("catalog").value_name("CSV"))
                .arg(Arg::new("year").long("year").value_parser(clap::value_parser!(u16)))
                .arg(Arg::new("region").long("region"))
                .arg(Arg::new("institution").long("institution"))
                .arg(Arg::new("specialization").long("specialization"))
                .arg(Arg::new("query").long("query").short('q'))
                .arg(
                    Arg::new("sort")
                        .long("sort")
                        .value_parser(["closest", "best-chances", "cutoff"])
                        .default_value("closest"),
                )
                .arg(Arg::new("limit").long("limit").value_parser(clap::value_parser!(usize))),
        )
        .subcommand(
            Command::new("compare")
                .about("Compare two programs for a student profile")
                .arg(Arg::new("program-a").long("program-a").value_name("CODE").required(true))
                .arg(Arg::new("program-b").long("program-b").value_name("CODE").required(true))
                .arg(Arg::new("profile").long("profile").value_name("FILE").required(true))
                .arg(Arg::new("catalog").long("catalog").value_name("CSV"))
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print the analysis as JSON")),
        )
        .subcommand(
            Command::new("show")
                .about("Show a stored comparison")
                .arg(Arg::new("id").long("id").value_name("UUID").required(true)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    let config = if Path::new(config_file).exists() {
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration from {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        default_config
    };

    init_tracing(&config.log_level);
    info!("Using configuration {}", config_file);

    match matches.subcommand() {
        Some(("score", args)) => run_score(args),
        Some(("rank", args)) => run_rank(&config, args),
        Some(("compare", args)) => run_compare(&config, args).await,
        Some(("show", args)) => run_show(&config, args).await,
        _ => Err(anyhow!("no command given")),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_profile(path: &str) -> Result<StudentProfile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile: {}", path))?;
    toml::from_str(&content).with_context(|| format!("Invalid profile: {}", path))
}

fn parse_grade(raw: &str) -> Result<(String, f64)> {
    let (subject, grade) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected SUBJECT=GRADE, got '{}'", raw))?;
    let grade = grade
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .with_context(|| format!("invalid grade in '{}'", raw))?;
    Ok((subject.trim().to_lowercase(), grade))
}

fn run_score(args: &ArgMatches) -> Result<()> {
    let (track, grades) = if let Some(path) = args.get_one::<String>("profile") {
        let profile = load_profile(path)?;
        (profile.track, profile.grades)
    } else {
        let track: Track = args
            .get_one::<String>("track")
            .ok_or_else(|| anyhow!("--track or --profile is required"))?
            .parse()
            .map_err(|e: String| anyhow!(e))?;
        let mut grades = Grades::new();
        if let Some(path) = args.get_one::<String>("grades") {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read grades: {}", path))?;
            grades = toml::from_str(&content).with_context(|| format!("Invalid grades: {}", path))?;
        }
        for raw in args.get_many::<String>("grade").into_iter().flatten() {
            let (subject, grade) = parse_grade(raw)?;
            grades.insert(subject, grade);
        }
        (track, grades)
    };

    let missing: Vec<&str> = track
        .coefficients()
        .iter()
        .map(|(subject, _)| *subject)
        .filter(|subject| !grades.contains_key(*subject))
        .collect();
    if !missing.is_empty() {
        println!("⚠️  Missing grades counted as 0: {}", missing.join(", "));
    }

    let result = compute_score(&grades, track);
    let shown = result.rounded();
    let level = score_level(result.fg);

    println!("🎓 Track: {}", track.label());
    println!("   MG: {:.2}", shown.mg);
    println!("   FB: {:.2}", shown.fb);
    println!("   FS: {:.2}", shown.fs);
    println!("   FG: {:.2}  ({}, {})", shown.fg, level.label(), level.color());
    println!("   Bonus only: {:.2}", result.bonus_only());
    Ok(())
}

fn run_rank(config: &Config, args: &ArgMatches) -> Result<()> {
    let score = match (args.get_one::<f64>("score"), args.get_one::<String>("profile")) {
        (Some(score), _) => *score,
        (None, Some(path)) => load_profile(path)?.admission_score(),
        (None, None) => return Err(anyhow!("--score or --profile is required")),
    };
    let catalog_path = args
        .get_one::<String>("catalog")
        .cloned()
        .unwrap_or_else(|| config.catalog_path.clone());
    let year = args.get_one::<u16>("year").copied().unwrap_or(config.reference_year);

    let catalog = load_catalog(&catalog_path)?;
    println!("📂 Loaded {} programs from {}", catalog.len(), catalog_path);

    let filter = ProgramFilter {
        region: args.get_one::<String>("region").cloned(),
        institution: args.get_one::<String>("institution").cloned(),
        specialization: args.get_one::<String>("specialization").cloned(),
        query: args.get_one::<String>("query").cloned(),
    };
    let sort: SortOrder = args
        .get_one::<String>("sort")
        .map(|s| s.parse::<SortOrder>())
        .transpose()
        .map_err(|e: String| anyhow!(e))?
        .unwrap_or_default();

    let mut recommender = RecommendationFilter::new(year).with_filter(filter).with_sort(sort);
    if let Some(limit) = args.get_one::<usize>("limit") {
        recommender = recommender.with_limit(*limit);
    }
    let ranked = recommender.rank(score, &catalog);

    println!("🎯 Score {:.2} against {} cutoffs: {} programs\n", score, year, ranked.len());
    for (i, entry) in ranked.iter().enumerate() {
        println!(
            "   {}. [{}] {} - {} ({})",
            i + 1,
            entry.program.code,
            entry.program.name,
            entry.program.institution,
            entry.program.region
        );
        println!(
            "      cutoff {:.2}, difference {:+.2}, chance: {}",
            entry.cutoff,
            entry.score_difference,
            entry.category.label()
        );
    }
    Ok(())
}

async fn run_compare(config: &Config, args: &ArgMatches) -> Result<()> {
    let catalog_path = args
        .get_one::<String>("catalog")
        .cloned()
        .unwrap_or_else(|| config.catalog_path.clone());
    let catalog = load_catalog(&catalog_path)?;

    let code_a = args.get_one::<String>("program-a").map(String::as_str).unwrap_or_default();
    let code_b = args.get_one::<String>("program-b").map(String::as_str).unwrap_or_default();
    let program_a = find_program(&catalog, code_a)
        .cloned()
        .ok_or_else(|| anyhow!("program {} not found in {}", code_a, catalog_path))?;
    let program_b = find_program(&catalog, code_b)
        .cloned()
        .ok_or_else(|| anyhow!("program {} not found in {}", code_b, catalog_path))?;
    let profile_path = args.get_one::<String>("profile").map(String::as_str).unwrap_or_default();
    let profile = load_profile(profile_path)?;

    let store = Arc::new(FileStore::open(&config.store_path).await?);
    let generator = Arc::new(HttpGenerator::from_config(&config.generator));
    let settings = OrchestratorSettings::new(config.reference_year, &config.orchestrator, &config.generator);
    let orchestrator = Arc::new(ComparisonOrchestrator::new(store.clone(), generator, settings));

    println!("🔍 Comparing {} and {}...", program_a.name, program_b.name);
    let (id, handle) = orchestrator
        .submit_and_generate(program_a, program_b, profile)
        .await?;
    println!("🆔 Comparison id: {}", id);

    let outcome = handle.await.context("generation task panicked")?;
    store.close().await?;
    let analysis = outcome?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_analysis(&analysis);
    }
    Ok(())
}

async fn run_show(config: &Config, args: &ArgMatches) -> Result<()> {
    let raw_id = args.get_one::<String>("id").map(String::as_str).unwrap_or_default();
    let id = Uuid::parse_str(raw_id).with_context(|| format!("invalid id: {}", raw_id))?;

    let store = FileStore::open(&config.store_path).await?;
    let record = store
        .get_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("comparison {} not found", id))?;
    store.close().await?;

    println!("🆔 {} ({:?})", record.id, record.status);
    println!(
        "   {} vs {} for year {}",
        record.request.program_a.code, record.request.program_b.code, record.request.year
    );
    match &record.analysis {
        Some(analysis) => print_analysis(analysis),
        None => println!("⏳ Analysis not ready yet"),
    }
    Ok(())
}

fn print_analysis(analysis: &ComparisonAnalysis) {
    if analysis.is_fallback {
        println!("⚠️  Generated text unavailable, showing the standard comparison");
    }
    println!("\n📋 {}\n", analysis.overview);

    for (label, assessment) in [("Program 1", &analysis.program1), ("Program 2", &analysis.program2)] {
        println!("📘 {} (suitability {:.1}/10)", label, assessment.suitability_score);
        for strength in &assessment.strengths {
            println!("   ✅ {}", strength);
        }
        for challenge in &assessment.challenges {
            println!("   ❌ {}", challenge);
        }
        for prospect in &assessment.career_prospects {
            println!("   💼 {}", prospect);
        }
    }

    if !analysis.program_comparison.is_empty() {
        println!("\n📊 Side by side:");
        for row in &analysis.program_comparison {
            println!("   {}: {} | {}", row.aspect, row.program1, row.program2);
        }
    }

    println!("\n💡 Recommended: {}", analysis.recommendation.preferred);
    println!("   {}", analysis.recommendation.reasoning);
    for step in &analysis.recommendation.action_steps {
        println!("   → {}", step);
    }

    if let Some(insights) = &analysis.insights {
        println!(
            "\n🎯 Score {:.2} ({}), points needed: {:.2}",
            insights.student_score, insights.score_tier_label, insights.points_needed
        );
        for program in [&insights.program1, &insights.program2] {
            println!(
                "   [{}] cutoff {:.2}: {}{}",
                program.code,
                program.cutoff,
                if program.admissible { "admissible" } else { "below cutoff" },
                if program.requires_relocation { ", requires relocation" } else { "" }
            );
        }
        println!("\n📅 Admission calendar:");
        for entry in &insights.calendar {
            println!("   {} - {}: {}", entry.period, entry.phase, entry.description);
        }
    }
}
