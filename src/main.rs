//! The rill command-line driver: load a graph description, run the
//! importer, and print the resulting module.

mod frontend;

use argh::FromArgs;
use rill_import::{import_graph, OpShapeRegistry};
use rill_ir::Printer;
use rill_utils::{Error, RillResult};
use std::path::PathBuf;

#[derive(FromArgs)]
/// Import a dataflow graph into a rill IR module.
pub struct Opts {
    /// input graph description (JSON)
    #[argh(positional)]
    pub file: PathBuf,

    /// output file; defaults to stdout
    #[argh(option, short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// enable pruning of nodes unreachable from the declared outputs,
    /// overriding the input file's setting
    #[argh(switch, long = "prune")]
    pub prune: bool,
}

fn run(opts: Opts) -> RillResult<()> {
    let text = std::fs::read_to_string(&opts.file)
        .map_err(|e| Error::misc(format!("cannot read {}: {}", opts.file.display(), e)))?;
    let mut loaded = frontend::load(&text)?;
    if opts.prune {
        loaded.config.prune_unused_nodes = true;
    }

    let registry = OpShapeRegistry::with_builtins();
    let module = import_graph(
        &loaded.graph,
        &loaded.library,
        &loaded.debug_info,
        &loaded.config,
        &registry,
    )?;

    let rendered = Printer::new().print_module(&module);
    match &opts.output {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|e| Error::misc(format!("cannot write {}: {}", path.display(), e)))?,
        None => print!("{}", rendered),
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .init();
    let opts: Opts = argh::from_env();
    if let Err(err) = run(opts) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
