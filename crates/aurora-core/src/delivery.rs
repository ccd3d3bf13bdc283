//! Local file layout for a delivered app version.
//!
//! APK names follow `<package>.<version>[.<split>].apk` so the facade can find
//! them again by substring; OBB files go to `<obb_dir>/<package>/` under the
//! names the platform expects.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aurora_schema::{DeliveryData, DeliveryError};

/// One file the downloader must write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub package_name: String,
    pub version_code: u64,
    /// Base APK first, then splits in delivery order
    pub apks: Vec<PlannedFile>,
    pub obb: Vec<PlannedFile>,
    obb_dir: PathBuf,
}

impl DeliveryPlan {
    pub fn new(data: &DeliveryData, download_dir: &Path, obb_root: &Path) -> Result<Self, DeliveryError> {
        data.validate()?;
        let package = &data.package_name;
        let version = data.version_code;

        let mut apks = vec![PlannedFile {
            url: data.base_url.clone(),
            path: download_dir.join(format!("{package}.{version}.apk")),
        }];
        apks.extend(data.splits.iter().map(|split| PlannedFile {
            url: split.url.clone(),
            path: download_dir.join(format!("{package}.{version}.{}.apk", split.name)),
        }));

        let obb_dir = obb_root.join(package);
        let obb = data
            .obb
            .iter()
            .map(|o| PlannedFile {
                url: o.url.clone(),
                path: obb_dir.join(format!("{}.{}.{package}.obb", o.kind.prefix(), o.version_code)),
            })
            .collect();

        Ok(Self {
            package_name: package.clone(),
            version_code: version,
            apks,
            obb,
            obb_dir,
        })
    }

    pub fn apk_paths(&self) -> Vec<PathBuf> {
        self.apks.iter().map(|f| f.path.clone()).collect()
    }

    /// `<obb_dir>/<package>`
    pub fn obb_dir(&self) -> &Path {
        &self.obb_dir
    }
}

/// Move OBB files downloaded into `staging` to their final location.
///
/// Each planned OBB is expected in `staging` under its final file name.
/// Returns the placed paths.
pub fn place_obb(plan: &DeliveryPlan, staging: &Path) -> io::Result<Vec<PathBuf>> {
    if plan.obb.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(plan.obb_dir())?;

    let mut placed = Vec::with_capacity(plan.obb.len());
    for file in &plan.obb {
        let Some(name) = file.path.file_name() else {
            continue;
        };
        let source = staging.join(name);
        if fs::rename(&source, &file.path).is_err() {
            // Staging and OBB roots may sit on different filesystems.
            fs::copy(&source, &file.path)?;
            fs::remove_file(&source)?;
        }
        tracing::debug!(obb = %file.path.display(), "Placed OBB");
        placed.push(file.path.clone());
    }
    Ok(placed)
}
