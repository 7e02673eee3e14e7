//! External tool invocation surface.
//!
//! `ToolOptions` is the fixed record of SpectronautCMD options; `to_args`
//! maps it onto the command line deterministically. Absent or blank options
//! are omitted entirely - never passed as empty strings - and boolean flags
//! are emitted only when set.

use std::path::PathBuf;

use crate::datafiles::DataFileEntry;

/// Options for one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    /// Main sub-command ("direct", "dia", ...); `None` for convert runs
    pub protocol: Option<String>,
    pub experiment_name: Option<String>,
    pub condition_file: Option<PathBuf>,
    pub properties_file: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    pub fasta_file: Option<PathBuf>,
    pub go_file: Option<PathBuf>,
    pub output_directory: Option<PathBuf>,
    pub temp_directory: Option<PathBuf>,
    pub mod_repository: Option<PathBuf>,
    pub enzyme_database: Option<PathBuf>,
    pub verbose: bool,
    pub parquet: bool,
    pub terminate_on_error: bool,
    pub segmented: bool,
}

fn push_path(args: &mut Vec<String>, flag: &str, value: &Option<PathBuf>) {
    if let Some(path) = value {
        if !path.as_os_str().is_empty() {
            args.push(flag.to_string());
            args.push(path.to_string_lossy().into_owned());
        }
    }
}

fn push_str(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(value) = value {
        if !value.is_empty() {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }
}

impl ToolOptions {
    /// Base argument vector. The same option always maps to the same
    /// flag/value pair, in a fixed order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        push_path(&mut args, "-setTemp", &self.temp_directory);
        push_path(&mut args, "--importModRepository", &self.mod_repository);
        push_path(&mut args, "--importEnzymeDB", &self.enzyme_database);
        if let Some(protocol) = &self.protocol {
            if !protocol.is_empty() {
                args.push(protocol.clone());
            }
        }
        push_str(&mut args, "-n", &self.experiment_name);
        push_path(&mut args, "-con", &self.condition_file);
        push_path(&mut args, "-s", &self.properties_file);
        push_path(&mut args, "-rs", &self.report_file);
        push_path(&mut args, "-fasta", &self.fasta_file);
        push_path(&mut args, "-go", &self.go_file);
        push_path(&mut args, "-o", &self.output_directory);
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if self.parquet {
            args.push("--writeParquet".to_string());
        }
        if self.terminate_on_error {
            args.push("--terminateAfterError".to_string());
        }
        if self.segmented {
            args.push("-segmented".to_string());
        }

        args
    }

    /// Base arguments plus one `-r <path>` pair per data file, for the main
    /// search invocation.
    pub fn full_args(&self, datafiles: &[DataFileEntry]) -> Vec<String> {
        let mut args = self.to_args();
        for entry in datafiles {
            args.push("-r".to_string());
            args.push(entry.path.to_string_lossy().into_owned());
        }
        args
    }
}

/// `activate <key>` sub-command.
pub fn activate_args(license_key: &str) -> Vec<String> {
    vec!["activate".to_string(), license_key.to_string()]
}

/// `deactivate` sub-command.
pub fn deactivate_args() -> Vec<String> {
    vec!["deactivate".to_string()]
}

/// `convert -i <path> <flags>` sub-command for one input file.
pub fn convert_args(input: &DataFileEntry, base_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "convert".to_string(),
        "-i".to_string(),
        input.path.to_string_lossy().into_owned(),
    ];
    args.extend_from_slice(base_args);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafiles::FileType;

    fn datafile(path: &str) -> DataFileEntry {
        DataFileEntry {
            name: path.to_string(),
            file_type: FileType::ThermoRaw,
            path: PathBuf::from(path),
            replicate: String::new(),
            condition: String::new(),
            fraction: String::new(),
            reference: false,
        }
    }

    #[test]
    fn maps_options_in_fixed_order() {
        let options = ToolOptions {
            protocol: Some("direct".to_string()),
            experiment_name: Some("exp1".to_string()),
            condition_file: Some(PathBuf::from("/p/cond.tsv")),
            properties_file: Some(PathBuf::from("/p/settings.prop")),
            fasta_file: Some(PathBuf::from("/p/db.fasta")),
            output_directory: Some(PathBuf::from("/out")),
            temp_directory: Some(PathBuf::from("/tmp/sn")),
            verbose: true,
            parquet: true,
            ..Default::default()
        };

        let args = options.to_args();
        assert_eq!(
            args,
            vec![
                "-setTemp", "/tmp/sn", "direct", "-n", "exp1", "-con", "/p/cond.tsv",
                "-s", "/p/settings.prop", "-fasta", "/p/db.fasta", "-o", "/out",
                "--verbose", "--writeParquet",
            ]
        );
    }

    #[test]
    fn blank_options_are_omitted_not_empty() {
        let options = ToolOptions {
            experiment_name: Some(String::new()),
            properties_file: Some(PathBuf::new()),
            ..Default::default()
        };
        assert!(options.to_args().is_empty());
    }

    #[test]
    fn same_options_always_yield_same_args() {
        let options = ToolOptions {
            protocol: Some("direct".to_string()),
            fasta_file: Some(PathBuf::from("/p/db.fasta")),
            terminate_on_error: true,
            ..Default::default()
        };
        assert_eq!(options.to_args(), options.to_args());
    }

    #[test]
    fn full_args_appends_r_per_file() {
        let options = ToolOptions {
            protocol: Some("direct".to_string()),
            ..Default::default()
        };
        let files = vec![datafile("/data/a.raw"), datafile("/data/b.raw")];
        let args = options.full_args(&files);
        assert_eq!(
            args,
            vec!["direct", "-r", "/data/a.raw", "-r", "/data/b.raw"]
        );
    }

    #[test]
    fn sub_command_surfaces() {
        assert_eq!(activate_args("KEY123"), vec!["activate", "KEY123"]);
        assert_eq!(deactivate_args(), vec!["deactivate"]);

        let file = datafile("/data/a.d");
        let args = convert_args(&file, &["--verbose".to_string()]);
        assert_eq!(args, vec!["convert", "-i", "/data/a.d", "--verbose"]);
    }
}
