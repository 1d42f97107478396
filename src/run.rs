use anyhow::anyhow;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::build_result::KeyedBuildResult;
use crate::derived_path::DerivedPath;
use crate::progress::ConsoleProgress;
use crate::store::DirStore;
use crate::strategy::Planner;
use crate::worker::{Settings, Worker};
use crate::{manifest, signal, trace};

#[derive(argh::FromArgs)]
/// goalwork: realise store paths and derivation outputs described by a plan.
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// plan file [default=plan.goals]
    #[argh(option, short = 'f', default = "String::from(\"plan.goals\")")]
    plan: String,

    /// debugging tools
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// stop at the first failure
    #[argh(switch)]
    fail_fast: bool,

    /// fail a build that prints nothing for this many seconds
    #[argh(option)]
    max_silent_time: Option<u64>,

    /// fail a build that runs longer than this many seconds
    #[argh(option)]
    timeout: Option<u64>,

    /// print debug logs and build output
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// requests: store paths, or DRV^out1,out2 / DRV^*
    #[argh(positional)]
    requests: Vec<String>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (tests running in one process) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn summary_line(keyed: &KeyedBuildResult) -> String {
    let res = &keyed.result;
    let mut line = format!("{}: {}", keyed.path, res.status);
    if res.success() {
        if !res.built_outputs.is_empty() {
            let outs: Vec<String> = res
                .built_outputs
                .iter()
                .map(|(name, path)| format!("{}={}", name, path))
                .collect();
            line.push_str(&format!(" ({})", outs.join(", ")));
        }
    } else if let Some(first) = res.error_msg.lines().next() {
        line.push_str(": ");
        line.push_str(first);
    }
    line
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();
    init_logging(opts.verbose);

    if let Some(debug) = &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  trace  generate json performance trace");
                return Ok(1);
            }
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &opts.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let mut settings = Settings {
        keep_going: !opts.fail_fast,
        max_silent_time: opts.max_silent_time.map(Duration::from_secs),
        build_timeout: opts.timeout.map(Duration::from_secs),
        ..Settings::default()
    };
    if let Some(jobs) = opts.jobs {
        settings.max_jobs = jobs;
    }

    if opts.requests.is_empty() {
        anyhow::bail!("no requests given");
    }
    let mut reqs = Vec::new();
    for req in &opts.requests {
        let path = DerivedPath::parse(req).map_err(|err| anyhow!("bad request {:?}: {}", req, err))?;
        reqs.push(path);
    }

    let manifest = trace::scope("manifest::read", || manifest::read(Path::new(&opts.plan)))?;
    let planner = Planner::new(manifest);
    let store = DirStore::new(".");
    let mut progress = ConsoleProgress::new(opts.verbose);

    signal::register_sigint();
    let results = {
        let mut worker = Worker::new(settings, &store, &mut progress);
        trace::scope("worker.realize", || {
            worker.realize(&reqs, |registry, req| planner.goal_for(registry, req))
        })?
    };

    let mut failed = false;
    for keyed in &results {
        failed |= !keyed.result.success();
        println!("{}", summary_line(keyed));
    }
    Ok(if failed { 1 } else { 0 })
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    if let Err(err) = trace::close() {
        tracing::warn!("writing trace: {}", err);
    }
    res
}
