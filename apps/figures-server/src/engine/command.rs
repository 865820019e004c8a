//! Engine command line construction

use std::ffi::OsString;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use super::types::EngineSettings;

/// Java2D colour management provider the engine needs on headless JVMs
const KCMS_PROVIDER: &str = "-Dsun.java2d.cmm=sun.java2d.cmm.kcms.KcmsServiceProvider";

/// A fully resolved engine invocation
///
/// Launchers get the structured fields as well as the argv, so a fake engine
/// can find the input and write into the output directory.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<OsString>,
    /// Child working directory, if any
    pub current_dir: Option<PathBuf>,
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

impl EngineCommand {
    /// Build the single-document command
    ///
    /// The engine treats `-m` / `-d` as path prefixes, so directories must
    /// carry a trailing separator.
    pub fn single(settings: &EngineSettings, input: &Path, output_dir: &Path) -> Self {
        let prefix = dir_prefix(output_dir);

        let mut args: Vec<OsString> = settings
            .java_opts
            .split_whitespace()
            .map(OsString::from)
            .collect();
        args.push(KCMS_PROVIDER.into());
        args.push("-jar".into());
        args.push(settings.jar_path.clone().into_os_string());
        args.push(input.as_os_str().to_owned());
        args.push("-m".into());
        args.push(prefix.clone());
        args.push("-d".into());
        args.push(prefix);
        args.push("--dpi".into());
        args.push(settings.dpi.to_string().into());

        let current_dir = settings
            .working_dir
            .is_dir()
            .then(|| settings.working_dir.clone());

        Self {
            program: settings.program.clone(),
            args,
            current_dir,
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Printable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

fn dir_prefix(dir: &Path) -> OsString {
    let mut prefix = dir.as_os_str().to_owned();
    if !prefix.to_string_lossy().ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR.to_string());
    }
    prefix
}
