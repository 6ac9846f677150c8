//! Template families and their ordered file lists
//!
//! The master list holds nine amyloid PET templates (all / positive /
//! negative for florbetapir, florbetaben and flutemetamol). Each tracer
//! family is the three-member slice of that list for its tracer, in the
//! same relative order. Coefficient `i` of a fit always belongs to entry `i`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpopError};
use crate::volume::Volume;

/// Fixed reference for the initial affine registration, whatever the family
pub const REGISTRATION_REFERENCE: &str = "Template_FBB_all.nii";

const ALL_TEMPLATES: [&str; 9] = [
    "Template_FBP_all.nii",
    "Template_FBP_pos.nii",
    "Template_FBP_neg.nii",
    "Template_FBB_all.nii",
    "Template_FBB_pos.nii",
    "Template_FBB_neg.nii",
    "Template_FLUTE_all.nii",
    "Template_FLUTE_pos.nii",
    "Template_FLUTE_neg.nii",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateFamily {
    /// All nine tracer templates (selector 1)
    All,
    /// Florbetapir (selector 2)
    Florbetapir,
    /// Florbetaben (selector 3)
    Florbetaben,
    /// Flutemetamol (selector 4)
    Flutemetamol,
}

impl TryFrom<i64> for TemplateFamily {
    type Error = RpopError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            1 => Ok(TemplateFamily::All),
            2 => Ok(TemplateFamily::Florbetapir),
            3 => Ok(TemplateFamily::Florbetaben),
            4 => Ok(TemplateFamily::Flutemetamol),
            other => Err(RpopError::InvalidSelector(other)),
        }
    }
}

impl fmt::Display for TemplateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateFamily::All => "all tracers",
            TemplateFamily::Florbetapir => "florbetapir",
            TemplateFamily::Florbetaben => "florbetaben",
            TemplateFamily::Flutemetamol => "flutemetamol",
        };
        f.write_str(name)
    }
}

impl TemplateFamily {
    pub fn selector(self) -> i64 {
        match self {
            TemplateFamily::All => 1,
            TemplateFamily::Florbetapir => 2,
            TemplateFamily::Florbetaben => 3,
            TemplateFamily::Flutemetamol => 4,
        }
    }

    /// Ordered template file names for this family
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            TemplateFamily::All => &ALL_TEMPLATES,
            TemplateFamily::Florbetapir => &ALL_TEMPLATES[0..3],
            TemplateFamily::Florbetaben => &ALL_TEMPLATES[3..6],
            TemplateFamily::Flutemetamol => &ALL_TEMPLATES[6..9],
        }
    }
}

/// Ordered template paths for one family
#[derive(Clone, Debug)]
pub struct TemplateSet {
    family: TemplateFamily,
    paths: Vec<PathBuf>,
}

impl TemplateSet {
    pub fn resolve(family: TemplateFamily, template_dir: &Path) -> Self {
        let paths = family.file_names().iter().map(|name| template_dir.join(name)).collect();
        Self { family, paths }
    }

    pub fn family(&self) -> TemplateFamily {
        self.family
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Load every template in order; all must share one grid.
    pub fn load(&self) -> Result<Vec<Volume>> {
        let mut volumes: Vec<Volume> = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let volume = Volume::load(path)?;
            if let Some(first) = volumes.first() {
                first.ensure_same_shape(&volume)?;
            }
            tracing::debug!(path = %path.display(), dims = ?volume.dims(), "loaded template");
            volumes.push(volume);
        }
        Ok(volumes)
    }
}
