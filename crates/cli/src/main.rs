mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{CallSignature, CanonicalType, Primitive, TemplateArg, Value};
use dispatch::{CallOptions, Session};
use vault::{index::kind_label, MappedIndex, INDEX_FILE};

use crate::config::{BindConfig, Driver};

/// Header extensions picked up when a directory is passed to `reflect`.
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx"];

#[derive(Parser)]
#[command(name = "lazybind")]
#[command(about = "On-demand native bindings for templated C++ headers", long_about = None)]
struct Cli {
    /// Output directory holding `kernels.json` and `build/`.
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,
    /// Compiler driver, overriding LAZYBIND_DRIVER.
    #[arg(long, global = true, value_enum)]
    driver: Option<Driver>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reflect a header set and prepare the build directory.
    Reflect {
        /// Header files or directories, in include order.
        #[arg(required = true)]
        headers: Vec<PathBuf>,
        /// Extra compiler flags, e.g. `--flag=-DNDEBUG`.
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,
    },
    /// Print the serialized signature and artifact key of a call.
    Hash {
        /// Function name, or the class name with `--constructor`.
        name: String,
        /// Canonical argument types, in order.
        #[arg(long = "arg")]
        args: Vec<String>,
        #[arg(long)]
        namespace: Option<String>,
        /// Explicit template arguments, spelled verbatim.
        #[arg(long = "template")]
        template_args: Vec<String>,
        /// Treat `name` as a fully qualified class and hash its constructor.
        #[arg(long)]
        constructor: bool,
    },
    /// Call a reflected free function with literal arguments.
    Call {
        function: String,
        /// Literals: integers, reals, `true`/`false`, `Enum::Enumerator`, or text.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long = "template")]
        template_args: Vec<String>,
    },
    /// List the artifacts recorded in the build directory.
    Cache {
        /// Also list the enum table.
        #[arg(long)]
        enums: bool,
    },
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: .env: {}", e);
        }
    }
    init_logging();

    let cli = Cli::parse();
    let mut config = BindConfig::from_env()?;
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    if let Some(driver) = cli.driver {
        config.driver = driver;
    }

    match &cli.command {
        Commands::Reflect { headers, flags } => cmd_reflect(&config, headers, flags)?,
        Commands::Hash { name, args, namespace, template_args, constructor } => {
            cmd_hash(name, args, namespace.as_deref(), template_args, *constructor)
        }
        Commands::Call { function, args, namespace, template_args } => {
            cmd_call(&config, function, args, namespace.clone(), template_args)?
        }
        Commands::Cache { enums } => cmd_cache(&config, *enums)?,
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("LAZYBIND_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialised");
    }
}

// ---------------------------------------------------------------------------
// reflect
// ---------------------------------------------------------------------------

fn cmd_reflect(config: &BindConfig, inputs: &[PathBuf], flags: &[String]) -> anyhow::Result<()> {
    let headers = collect_headers(inputs)?;
    if headers.is_empty() {
        println!("No C++ headers found.");
        return Ok(());
    }

    let compiler = config.compiler();
    let set = anatomist::HeaderSet::new(headers, flags.to_vec());
    let module = anatomist::generate_wrapper(&config.output_dir, &set, compiler.as_ref())
        .with_context(|| format!("reflecting into {}", config.output_dir.display()))?;

    println!("+------------------------------------------+");
    println!("| LAZYBIND REFLECT                         |");
    println!("+------------------------------------------+");
    println!("| Headers        : {:>22} |", set.paths.len());
    println!("| Classes        : {:>22} |", module.classes.len());
    println!("| Functions      : {:>22} |", module.functions.len());
    println!("| Enums          : {:>22} |", module.enums.len());
    println!("+------------------------------------------+");

    for class in &module.classes {
        let parent = class.parent.as_deref().map(|p| format!(" : {p}")).unwrap_or_default();
        let template = if class.is_template { " <template>" } else { "" };
        println!("  class {}{}{} ({} members)", common::qualify(class.namespace.as_deref(), &class.name), template, parent, class.members.len());
    }
    for function in &module.functions {
        println!(
            "  fn    {} ({} overloads)",
            common::qualify(function.namespace.as_deref(), &function.name),
            function.overloads.len()
        );
    }
    for e in &module.enums {
        println!("  enum  {} {{{}}}", common::qualify(e.namespace.as_deref(), &e.name), e.enumerators.join(", "));
    }
    Ok(())
}

/// Expands directories into the headers beneath them, sorted for a stable include order.
fn collect_headers(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    use walkdir::WalkDir;

    let mut headers = Vec::new();
    for input in inputs {
        if input.is_file() {
            headers.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            anyhow::bail!("no such header or directory: {}", input.display());
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_header(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        found.sort();
        headers.extend(found);
    }
    Ok(headers)
}

fn is_header(path: &Path) -> bool {
    path.extension().and_then(|x| x.to_str()).is_some_and(|ext| HEADER_EXTENSIONS.contains(&ext))
}

// ---------------------------------------------------------------------------
// hash
// ---------------------------------------------------------------------------

fn cmd_hash(name: &str, args: &[String], namespace: Option<&str>, template_args: &[String], constructor: bool) {
    let types: Vec<CanonicalType> = args.iter().map(|a| CanonicalType::new(a.as_str())).collect();
    let signature = if constructor {
        CallSignature::constructor(&CanonicalType::new(common::qualify(namespace, name)), types)
    } else {
        CallSignature::function(name, namespace, types, template_list(template_args))
    };
    let key = signature.key();
    println!("signature : {}", key.signature);
    println!("key       : {}", key.hash);
}

fn template_list(raw: &[String]) -> Option<Vec<TemplateArg>> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.iter().map(TemplateArg::raw).collect())
    }
}

// ---------------------------------------------------------------------------
// call
// ---------------------------------------------------------------------------

fn cmd_call(
    config: &BindConfig,
    function: &str,
    literals: &[String],
    namespace: Option<String>,
    template_args: &[String],
) -> anyhow::Result<()> {
    let mut session = Session::open(&config.output_dir, config.compiler())
        .with_context(|| format!("opening session in {}", config.output_dir.display()))?;

    let values: Vec<Value> = literals.iter().map(|l| parse_literal(&session, l)).collect();
    let args: Vec<common::Arg<'_>> = values.iter().map(common::Arg::Value).collect();
    let mut opts = CallOptions::new();
    if let Some(ns) = namespace {
        opts = opts.namespace(ns);
    }
    if let Some(targs) = template_list(template_args) {
        opts = opts.template_args(targs);
    }

    let result = session.call_function(function, &args, &opts).with_context(|| format!("calling `{function}`"))?;
    println!("{}", render(&result));
    println!("{}", session.stats());
    Ok(())
}

/// Interprets one command-line literal as a host value.
fn parse_literal(session: &Session, literal: &str) -> Value {
    match literal {
        "true" => return Value::from(true),
        "false" => return Value::from(false),
        _ => {}
    }
    if let Ok(i) = literal.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(d) = literal.parse::<f64>() {
        return Value::from(d);
    }
    if let Some((ty, enumerator)) = literal.rsplit_once("::") {
        if let Ok(value) = session.enum_value(ty, enumerator) {
            return value;
        }
    }
    Value::from(literal)
}

fn render(value: &Value) -> String {
    match value {
        Value::Primitive(Primitive::Void) => "(void)".to_string(),
        Value::Primitive(Primitive::Bool(b)) => b.to_string(),
        Value::Primitive(Primitive::Int(i)) => i.to_string(),
        Value::Primitive(Primitive::Real(d)) => d.to_string(),
        Value::Primitive(Primitive::Text(s)) => format!("{s:?}"),
        Value::Primitive(Primitive::Enum(e)) => match &e.enumerator {
            Some(name) => format!("{}::{}", e.type_name, name),
            None => format!("{}({})", e.type_name, e.value),
        },
        Value::View(view) => format!("<{} shape={:?} at {:p}>", view.cpp_type, view.shape, view.handle.as_ptr()),
        Value::Instance(inst) => format!("<{} at {:p}>", inst.cpp_type, inst.handle.as_ptr()),
        Value::Type(ty) => format!("<type {}>", ty.cpp_type),
    }
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

fn cmd_cache(config: &BindConfig, enums: bool) -> anyhow::Result<()> {
    let build_dir = config.output_dir.join(anatomist::BUILD_DIR);
    let index_path = build_dir.join(INDEX_FILE);

    println!("+------------------------------------------+");
    println!("| LAZYBIND CACHE                           |");
    println!("+------------------------------------------+");
    if !index_path.exists() {
        println!("| Artifacts      : {:>22} |", 0);
        println!("+------------------------------------------+");
        println!("No artifacts recorded in {}.", build_dir.display());
    } else {
        let index = MappedIndex::open(&index_path).with_context(|| format!("opening {}", index_path.display()))?;
        println!("| Artifacts      : {:>22} |", index.len());
        println!("+------------------------------------------+");
        for entry in index.archived().entries.iter() {
            println!(
                "  {}  {:<12} {}  -> {}",
                entry.hash.as_str(),
                kind_label(entry.kind),
                entry.signature.as_str(),
                entry.return_type.as_str()
            );
        }
    }

    if enums {
        let session = Session::open(&config.output_dir, config.compiler())
            .with_context(|| format!("opening session in {}", config.output_dir.display()))?;
        println!("\nENUMS:");
        if session.enums().is_empty() {
            println!("  (none)");
        }
        for (ty, name, value) in session.enums().rows() {
            println!("  {ty}::{name} = {value}");
        }
    }
    Ok(())
}
