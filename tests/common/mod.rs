//! Common test utilities for rpop-core integration tests
#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rpop_core::gateway::{
    Registration, RegistrationOutput, RegistrationRequest, SmoothnessEstimator, SmoothnessRequest,
};
use rpop_core::smoothing::FwhmTriple;
use rpop_core::templates::TemplateFamily;
use rpop_core::volume::{idx3d, Dims};
use rpop_core::{Result, RpopError, Volume};

/// Compute RMSE between two arrays
pub fn rmse(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum_sq / a.len() as f64).sqrt()
}

/// Volume with isotropic `voxel_mm` spacing whose voxel (i, j, k) is `f(i, j, k)`
pub fn pattern_volume(dims: Dims, voxel_mm: f64, f: impl Fn(usize, usize, usize) -> f64) -> Volume {
    let (nx, ny, nz) = dims;
    let mut data = vec![0.0; nx * ny * nz];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                data[idx3d(i, j, k, nx, ny)] = f(i, j, k);
            }
        }
    }
    Volume::filled(dims, 0.0, voxel_mm)
        .with_data(data)
        .expect("pattern volume")
}

/// Write all nine templates into `dir`; template `n` (master-list order) is `make(n)`.
pub fn write_templates(dir: &Path, make: impl Fn(usize) -> Volume) {
    fs::create_dir_all(dir).expect("template dir");
    for (n, name) in TemplateFamily::All.file_names().iter().enumerate() {
        make(n).save(&dir.join(name)).expect("write template");
    }
}

/// CSV files directly inside `dir` (none when it does not exist)
pub fn csv_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "csv").unwrap_or(false))
        .collect();
    files.sort();
    files
}

/// Registration stand-in: writes a fixed volume per kind under the ANTs
/// output names and records every request it receives.
pub struct FakeRegistration {
    pub initial: Volume,
    pub final_: Volume,
    pub calls: Rc<RefCell<Vec<RegistrationRequest>>>,
}

impl FakeRegistration {
    pub fn new(initial: Volume, final_: Volume) -> (Self, Rc<RefCell<Vec<RegistrationRequest>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        (Self { initial, final_, calls: Rc::clone(&calls) }, calls)
    }
}

impl Registration for FakeRegistration {
    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationOutput> {
        self.calls.borrow_mut().push(request.clone());
        let registered = request.work_dir.join(format!("{}.nii.gz", request.prefix));
        let transform = request.work_dir.join(format!("{}0GenericAffine.mat", request.prefix));
        let volume = match request.kind {
            rpop_core::gateway::RegistrationKind::Initial => &self.initial,
            rpop_core::gateway::RegistrationKind::Final => &self.final_,
        };
        volume.save(&registered)?;
        fs::write(&transform, b"#Insight Transform File V1.0\n").map_err(|e| RpopError::Io {
            path: transform.clone(),
            source: e,
        })?;
        Ok(RegistrationOutput { registered, transform })
    }
}

/// Smoothness estimator returning a fixed measurement
pub struct FixedEstimator(pub FwhmTriple);

impl SmoothnessEstimator for FixedEstimator {
    fn estimate(&self, request: &SmoothnessRequest) -> Result<FwhmTriple> {
        if !request.volume.is_file() {
            return Err(RpopError::FileNotFound(request.volume.clone()));
        }
        Ok(self.0)
    }
}

/// Smoothness estimator whose tool always fails
pub struct FailingEstimator;

impl SmoothnessEstimator for FailingEstimator {
    fn estimate(&self, _request: &SmoothnessRequest) -> Result<FwhmTriple> {
        Err(RpopError::ExternalToolFailure {
            tool: "afni.sh".to_string(),
            reason: "exit status: 1: 3dFWHMx: no automask".to_string(),
        })
    }
}
