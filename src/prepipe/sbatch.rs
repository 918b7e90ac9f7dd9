// src/prepipe/sbatch.rs

//! Slurm batch scripts for per-CCD jobs.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::SbatchSettings;

/// Which CCDs of an exposure get a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcdSelection {
    pub first: u32,
    pub last: u32,
    pub exclude: Vec<u32>,
}

impl Default for CcdSelection {
    fn default() -> Self {
        Self {
            first: 1,
            last: 59,
            exclude: Vec::new(),
        }
    }
}

impl CcdSelection {
    /// CCD numbers as strings, ascending.
    pub fn ccds(&self) -> Vec<String> {
        (self.first..=self.last)
            .filter(|c| !self.exclude.contains(c))
            .map(|c| c.to_string())
            .collect()
    }
}

/// Split `ccds` into consecutive groups of at most `per_script`.
pub fn chunk_ccds(ccds: &[String], per_script: usize) -> Vec<Vec<String>> {
    ccds.chunks(per_script.max(1)).map(<[String]>::to_vec).collect()
}

/// Everything needed to render one batch script.
#[derive(Debug, Clone)]
pub struct SbatchJob<'a> {
    /// Job name, `<root>_q<k>`.
    pub qroot: String,
    /// `<sbatch_dir>/out/<qroot>`; `.stdout`/`.stderr` are appended.
    pub out_prefix: PathBuf,
    /// Image file names, one job line each.
    pub images: Vec<String>,
    pub run_date: &'a str,
    pub program: &'a str,
    /// Arguments placed before the `process-ccd` subcommand.
    pub program_args: &'a [String],
    pub settings: &'a SbatchSettings,
}

/// Quote `s` for a POSIX shell if it needs it.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,~".contains(c));
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

/// `<program> [args] process-ccd -i <image> -d <run_date> &`
pub fn job_line(program: &str, program_args: &[String], image: &str, run_date: &str) -> String {
    let mut line = shell_quote(program).into_owned();
    for arg in program_args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    let _ = write!(
        line,
        " process-ccd -i {} -d {} &",
        shell_quote(image),
        shell_quote(run_date)
    );
    line
}

pub fn render_script(job: &SbatchJob<'_>) -> String {
    let s = job.settings;
    let out = job.out_prefix.to_string_lossy();
    let reservation = match &s.reservation {
        Some(name) => format!("#SBATCH --reservation={name}\n"),
        None => String::new(),
    };
    let jobs: String = job
        .images
        .iter()
        .map(|image| job_line(job.program, job.program_args, image, job.run_date) + "\n")
        .collect();

    format!(
        r#"#!/bin/bash
#SBATCH -J {qroot}
#SBATCH -o {out}.stdout
#SBATCH -e {out}.stderr
#SBATCH --time={walltime}
#SBATCH -A {account}
#SBATCH --nodes={nodes}
#SBATCH --ntasks-per-node={ntasks}
#SBATCH --mem={mem}
#SBATCH --tmp={tmp}
{reservation}
echo ------------------------------------------------------
echo Automated script by dwf-prepipe
echo ------------------------------------------------------
echo -n 'Job is running on node '; cat $SLURM_NODELIST
echo ------------------------------------------------------
echo SBATCH: sbatch is running on $SLURM_SUBMIT_HOST
echo SBATCH: working directory is $SLURM_SUBMIT_DIR
echo SBATCH: job identifier is $SLURM_JOB_ID
echo SBATCH: job name is $SLURM_JOB_NAME
echo ------------------------------------------------------

{jobs}
wait

echo ------------------------------------------------------
"#,
        qroot = job.qroot,
        walltime = s.walltime,
        account = s.account,
        nodes = s.nodes,
        ntasks = s.ntasks_per_node,
        mem = s.mem,
        tmp = s.tmp,
    )
}
