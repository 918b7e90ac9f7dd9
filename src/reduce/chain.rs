// src/reduce/chain.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConfigFile, ProcessSettings, ToolPaths, validate_run_date};
use crate::errors::{PrepipeError, Result};
use crate::exec::{CommandRunner, ToolCommand, run_checked};
use crate::fits::read_primary_header;
use crate::fs::FileSystem;
use crate::reduce::calibration::{Calibration, find_calibration};
use crate::reduce::naming::{ExposureName, FrameInfo, FrameKind, FrameProducts};

/// SourceExtractor, SCAMP and MissFITS configuration, all read from one
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstromaticConfig {
    pub sex: PathBuf,
    pub param: PathBuf,
    pub filter: PathBuf,
    pub nnw: PathBuf,
    pub scamp: PathBuf,
    pub missfits: PathBuf,
}

impl AstromaticConfig {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            sex: dir.join("scamp.sex"),
            param: dir.join("scamp.param"),
            filter: dir.join("default.conv"),
            nnw: dir.join("default.nnw"),
            scamp: dir.join("scamp.conf"),
            missfits: dir.join("missfits.conf"),
        }
    }
}

/// Where one CCD ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcdOutcome {
    /// A flat or bias frame, filed in the raw-data tree for master creation.
    Filed { frame: PathBuf, kind: FrameKind },
    /// A science frame copied into the workspace and run through the
    /// calibration and astrometry tools.
    Reduced {
        raw: PathBuf,
        flat: PathBuf,
        bias: PathBuf,
        products: FrameProducts,
    },
}

/// Runs the per-CCD chain started by each batch-script job line.
pub struct CcdReducer {
    settings: ProcessSettings,
    tools: ToolPaths,
    astromatic: AstromaticConfig,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for CcdReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CcdReducer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CcdReducer {
    /// Build from a configuration validated for `Role::ProcessCcd`.
    pub fn new(
        cfg: &ConfigFile,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let settings = cfg.process()?.clone();
        Ok(Self {
            astromatic: AstromaticConfig::in_dir(&settings.astromatic_dir),
            settings,
            tools: cfg.tools.clone(),
            runner,
            fs,
        })
    }

    /// Process `input` (a file name inside the untar directory) for the
    /// night `run_date`.
    pub async fn process_ccd(&self, input: &str, run_date: &str) -> Result<CcdOutcome> {
        validate_run_date(run_date)?;
        let name = ExposureName::parse(input).ok_or_else(|| {
            anyhow::anyhow!("{input} is not a DECam_<exposure>_<ccd> file name")
        })?;

        let mut work_dir = self.settings.untar_dir.clone();
        let mut source = work_dir.join(input);

        if let Some(local) = &self.settings.local_dir {
            self.fs.create_dir_all(local)?;
            let moved = local.join(input);
            info!(from = %source.display(), to = %moved.display(), "Moving to node-local storage");
            self.fs.rename(&source, &moved)?;
            source = moved;
            work_dir = local.clone();
        }

        let compressed = source.extension().is_some_and(|e| e == "jp2");
        let fits = if compressed {
            let out = work_dir.join(format!("{}.fits", name.root));
            info!(file = input, dir = %work_dir.display(), "Uncompressing");
            let cmd = ToolCommand::new(&self.tools.j2f)
                .arg("-i")
                .arg(&source)
                .arg("-o")
                .arg(&out)
                .arg("-num_threads")
                .arg("1");
            run_checked(self.runner.as_ref(), &cmd).await?;
            out
        } else {
            source.clone()
        };

        let header = read_primary_header(&fits)?;
        let info = FrameInfo::from_header(&header)?;
        let new_name = info.output_name(run_date, &name.ccd);

        let dest_dir = self.settings.rawdata_dir.join(run_date).join(&name.ccd);
        let workspace_dir = self.settings.workspace_dir.join(&name.ccd);
        for dir in [&dest_dir, &workspace_dir] {
            if !self.fs.is_dir(dir) {
                info!(dir = %dir.display(), "Creating Directory");
                self.fs.create_dir_all(dir)?;
            }
        }

        let raw = dest_dir.join(&new_name);
        info!(from = %fits.display(), to = %raw.display(), kind = %info.kind, "Filing frame");
        self.fs.rename(&fits, &raw)?;

        if info.kind.is_calibration() {
            self.discard_input(&source, compressed);
            return Ok(CcdOutcome::Filed {
                frame: raw,
                kind: info.kind,
            });
        }

        let flat = find_calibration(self.fs.as_ref(), &dest_dir, Calibration::Flat(&info.filter))?;
        let bias = find_calibration(self.fs.as_ref(), &dest_dir, Calibration::Bias)?;

        let gaia = self
            .settings
            .gaia_dir
            .join(format!("{}_gaia_dr2_LDAC.fits", info.field));
        if !self.fs.is_file(&gaia) {
            return Err(PrepipeError::MissingCalibration(format!(
                "Gaia catalogue {} does not exist",
                gaia.display()
            )));
        }

        let frame = workspace_dir.join(&new_name);
        self.fs.copy(&raw, &frame)?;
        let products = FrameProducts::for_frame(&frame);

        self.reduce(&products, &flat, &bias, &gaia).await?;
        self.discard_input(&source, compressed);

        Ok(CcdOutcome::Reduced {
            raw,
            flat,
            bias,
            products,
        })
    }

    async fn reduce(
        &self,
        products: &FrameProducts,
        flat: &Path,
        bias: &Path,
        gaia: &Path,
    ) -> Result<()> {
        let frame = &products.frame;

        if let Some(calibrate) = &self.tools.calibrate {
            let cmd = ToolCommand::new(calibrate)
                .arg(format!("--input-frames={}", frame.display()))
                .arg(format!("--flat-frames={}", flat.display()))
                .arg(format!("--bias-frames={}", bias.display()));
            info!(cmd = %cmd, "Running pixel calibration");
            run_checked(self.runner.as_ref(), &cmd).await?;
        }

        let a = &self.astromatic;
        let sex = ToolCommand::new(&self.tools.sex)
            .arg("-c")
            .arg(&a.sex)
            .arg("-CATALOG_NAME")
            .arg(&products.catalog)
            .arg("-CHECKIMAGE_NAME")
            .arg(&products.noise)
            .arg(frame)
            .arg("-PARAMETERS_NAME")
            .arg(&a.param)
            .arg("-FILTER_NAME")
            .arg(&a.filter)
            .arg("-STARNNW_NAME")
            .arg(&a.nnw);
        info!(cmd = %sex, "Running sextractor");
        run_checked(self.runner.as_ref(), &sex).await?;
        info!(frame = %frame.display(), "sextractor complete");

        let scamp = ToolCommand::new(&self.tools.scamp)
            .arg("-c")
            .arg(&a.scamp)
            .arg(&products.catalog)
            .args(["-ASTREF_CATALOG", "FILE", "-ASTREFCAT_NAME"])
            .arg(gaia)
            .args([
                "-ASTREFCENT_KEYS",
                "RA_ICRS,DE_ICRS",
                "-ASTREFERR_KEYS",
                "e_RA_ICRS,e_DE_ICRS",
                "-ASTREFMAG_KEY",
                "Gmag",
            ]);
        info!(cmd = %scamp, "Running scamp");
        run_checked(self.runner.as_ref(), &scamp).await?;

        if !self.fs.is_file(&products.head) {
            warn!(head = %products.head.display(), "scamp wrote no header file");
        }

        let missfits = ToolCommand::new(&self.tools.missfits)
            .arg(frame)
            .arg("-c")
            .arg(&a.missfits);
        run_checked(self.runner.as_ref(), &missfits).await?;
        info!(frame = %frame.display(), "scamp complete");
        Ok(())
    }

    fn discard_input(&self, source: &Path, compressed: bool) {
        if !compressed {
            return;
        }
        info!(file = %source.display(), "Deleting");
        if let Err(e) = self.fs.remove_file(source) {
            warn!(file = %source.display(), error = %format!("{e:#}"), "could not delete input");
        }
    }
}
