//! `apploy build` - drive a build session and write the manifest tree
//!
//! With `--script` the file is run line by line and the first failing line
//! aborts the build. Without it, commands are read from stdin; a failing
//! command is reported and the session stays where it was.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use apploy_compiler::{compile, Format, Instance, ManifestWriter, Registry};
use apploy_model::{BuildSession, ScriptRunner, SessionState};
use clap::Args;
use tracing::{debug, info};

use crate::{Error, Result};

/// Arguments for `apploy build`
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build script to run; reads commands from stdin when omitted
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Existing directory the manifest tree is written into
    #[arg(long)]
    pub out: PathBuf,

    /// Manifest encoding (yaml or json)
    #[arg(long, default_value = "yaml")]
    pub format: Format,

    /// Namespace for resources that set none; defaults to the app name
    #[arg(long)]
    pub namespace: Option<String>,
}

/// Run the build command
pub fn run(args: BuildArgs) -> Result<()> {
    let registry = Registry::new();
    let generator = Generator::new(&registry, &args)?;

    let files = match &args.script {
        Some(path) => {
            let source = fs::read_to_string(path).map_err(|source| Error::ReadScript {
                path: path.clone(),
                source,
            })?;
            run_script(&source, &generator)?
        }
        None => {
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            interactive(stdin.lock(), &mut stdout, &generator)?
        }
    };

    for file in &files {
        println!("{}", file.display());
    }
    Ok(())
}

/// Compiles a closed session and writes it below the output directory
pub struct Generator<'r> {
    writer: ManifestWriter<'r>,
    out: PathBuf,
    namespace: Option<String>,
}

impl<'r> Generator<'r> {
    pub fn new(registry: &'r Registry, args: &BuildArgs) -> Result<Self> {
        if !args.out.is_dir() {
            return Err(Error::MissingOutDir {
                path: args.out.clone(),
            });
        }
        Ok(Self {
            writer: ManifestWriter::new(registry, args.format),
            out: args.out.clone(),
            namespace: args.namespace.clone(),
        })
    }

    /// Output directory
    pub fn out(&self) -> &Path {
        &self.out
    }

    /// Generate the session's app. The session must be in `AppBuilt`.
    pub fn generate(&self, session: &mut BuildSession) -> Result<Vec<PathBuf>> {
        let (root, files) = session.generate(|app| {
            let namespace = self.namespace.as_deref().unwrap_or(app.name());
            let manifests = compile(app, &Instance::new(app.name(), namespace))
                .map_err(|e| e.to_string())?;
            self.writer
                .write(&manifests, &self.out)
                .map_err(|e| e.to_string())
        })?;
        info!(app = %session.app().name(), root = %root.display(), files = files.len(), "app generated");
        Ok(files)
    }
}

/// Run a whole script, then generate the app it built
pub fn run_script(source: &str, generator: &Generator<'_>) -> Result<Vec<PathBuf>> {
    let mut runner = ScriptRunner::new();
    runner.run_script(source)?;
    let session = runner.session_mut().ok_or(Error::NoApp)?;
    if session.state() != SessionState::AppBuilt {
        return Err(Error::Unfinished {
            state: session.state(),
        });
    }
    generator.generate(session)
}

/// Read commands from `input` until the app is generated or input ends.
///
/// Besides the script commands, `help` shows the arguments the current scope
/// takes, `generate` retries a failed generation and `quit` abandons the build.
pub fn interactive<R, W>(input: R, output: &mut W, generator: &Generator<'_>) -> Result<Vec<PathBuf>>
where
    R: BufRead,
    W: Write,
{
    let mut runner = ScriptRunner::new();
    prompt(output, &runner)?;

    for line in input.lines() {
        let line = line?;
        match line.trim() {
            "help" => help(output, &runner)?,
            "quit" => {
                if let Some(session) = runner.session_mut() {
                    session.abandon()?;
                }
                writeln!(output, "build abandoned")?;
                return Ok(Vec::new());
            }
            "generate" => {
                if let Some(files) = try_generate(output, &mut runner, generator)? {
                    return Ok(files);
                }
            }
            command => match runner.execute(command) {
                Ok(Some(SessionState::AppBuilt)) => {
                    if let Some(files) = try_generate(output, &mut runner, generator)? {
                        return Ok(files);
                    }
                }
                Ok(state) => debug!(?state, "command accepted"),
                Err(e) => writeln!(output, "error: {}", e)?,
            },
        }
        prompt(output, &runner)?;
    }

    match runner.session() {
        None => Err(Error::NoApp),
        Some(session) => Err(Error::Unfinished {
            state: session.state(),
        }),
    }
}

/// Generate if the session allows it; failures are reported, not returned
fn try_generate<W: Write>(
    output: &mut W,
    runner: &mut ScriptRunner,
    generator: &Generator<'_>,
) -> Result<Option<Vec<PathBuf>>> {
    let Some(session) = runner.session_mut() else {
        writeln!(output, "error: no app started")?;
        return Ok(None);
    };
    if session.state() == SessionState::AppGenerateFailed {
        session.retry()?;
    }
    if session.state() != SessionState::AppBuilt {
        writeln!(output, "error: close the app before generating")?;
        return Ok(None);
    }

    match generator.generate(session) {
        Ok(files) => {
            writeln!(output, "wrote {} files to {}", files.len(), generator.out().display())?;
            Ok(Some(files))
        }
        Err(e) => {
            writeln!(output, "error: {}", e)?;
            writeln!(output, "fix the problem, then 'generate' to retry or 'quit'")?;
            Ok(None)
        }
    }
}

fn prompt<W: Write>(output: &mut W, runner: &ScriptRunner) -> io::Result<()> {
    match runner.session() {
        Some(session) => write!(output, "[{}]> ", session.state())?,
        None => write!(output, "> ")?,
    }
    output.flush()
}

fn help<W: Write>(output: &mut W, runner: &ScriptRunner) -> io::Result<()> {
    let Some(session) = runner.session() else {
        return writeln!(output, "start with: app <name> <version>");
    };
    if let Some(example) = session.args_example() {
        writeln!(output, "args {}", example)?;
    }
    if let Some(operations) = session.available_operations() {
        for (operation, fields) in operations {
            writeln!(output, "  {}: {}", operation, fields.join(" "))?;
        }
    }
    Ok(())
}
