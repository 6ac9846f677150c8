//! Composite template synthesis

use crate::error::{Result, RpopError};
use crate::volume::Volume;

/// Voxel-wise `Σ c_i T_i`, placed on the first template's geometry.
///
/// Values are not clipped or rescaled; a mixture with negative weights can
/// produce negative intensities.
pub fn synthesize(coefficients: &[f64], templates: &[Volume]) -> Result<Volume> {
    let Some(reference) = templates.first() else {
        return Err(RpopError::EmptyTemplateSet);
    };
    if coefficients.len() != templates.len() {
        return Err(RpopError::CoefficientMismatch {
            coefficients: coefficients.len(),
            templates: templates.len(),
        });
    }

    let mut composite = vec![0.0; reference.len()];
    for (&c, template) in coefficients.iter().zip(templates) {
        reference.ensure_same_shape(template)?;
        for (out, &t) in composite.iter_mut().zip(template.data()) {
            *out += c * t;
        }
    }
    reference.with_data(composite)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: (usize, usize, usize), offset: f64, affine_shift: f64) -> Volume {
        let n = dims.0 * dims.1 * dims.2;
        let base = Volume::filled(dims, 0.0, 2.0);
        let mut affine = *base.affine();
        affine[3] = affine_shift;
        base.with_affine(affine)
            .with_data((0..n).map(|i| i as f64 * 0.25 + offset).collect())
            .unwrap()
    }

    #[test]
    fn test_weighted_sum_is_exact() {
        let dims = (3, 4, 5);
        let templates = vec![ramp(dims, 1.0, -10.0), ramp(dims, -2.0, 5.0), ramp(dims, 7.5, 0.0)];
        let coefficients = [0.7, 0.6, -0.3];

        let out = synthesize(&coefficients, &templates).unwrap();
        assert_eq!(out.dims(), dims);
        for v in 0..out.len() {
            let mut expected = 0.0;
            for (c, t) in coefficients.iter().zip(&templates) {
                expected += c * t.data()[v];
            }
            assert_eq!(out.data()[v], expected);
        }
    }

    #[test]
    fn test_uses_first_template_affine() {
        let dims = (2, 2, 2);
        let templates = vec![ramp(dims, 0.0, -42.0), ramp(dims, 0.0, 17.0)];
        let out = synthesize(&[0.5, 0.5], &templates).unwrap();
        assert_eq!(out.affine(), templates[0].affine());
    }

    #[test]
    fn test_no_clipping_of_negative_values() {
        let dims = (2, 2, 2);
        let templates = vec![Volume::filled(dims, 1.0, 1.0), Volume::filled(dims, 4.0, 1.0)];
        let out = synthesize(&[2.0, -1.0], &templates).unwrap();
        assert!(out.data().iter().all(|&v| v == -2.0));
    }

    #[test]
    fn test_length_and_shape_errors() {
        let dims = (2, 2, 2);
        let templates = vec![Volume::filled(dims, 1.0, 1.0), Volume::filled(dims, 2.0, 1.0)];
        assert!(matches!(
            synthesize(&[1.0], &templates),
            Err(RpopError::CoefficientMismatch { coefficients: 1, templates: 2 })
        ));

        let mixed = vec![Volume::filled(dims, 1.0, 1.0), Volume::filled((2, 2, 3), 2.0, 1.0)];
        assert!(matches!(synthesize(&[0.5, 0.5], &mixed), Err(RpopError::ShapeMismatch { .. })));
        assert!(matches!(synthesize(&[], &[]), Err(RpopError::EmptyTemplateSet)));
    }
}
