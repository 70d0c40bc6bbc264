mod export;
mod plot;

use ndarray::{prelude::*, ArrayView, Dimension, Zip};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    error::{Error, Result},
    response::ResponseMaps,
};
pub use export::{save_merged_csv, save_summary, RunSummary};
pub use plot::{draw_map, jet, save_map_plots};

/// Clamp ranges of the plotted maps, `(min, max)`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct DisplayRange {
    pub structural: (f64, f64),
    pub calcium: (f64, f64),
    /// Shared by ΔF/F and ΔR/R.
    pub response: (f64, f64),
}

impl Default for DisplayRange {
    fn default() -> Self {
        DisplayRange {
            structural: (25.0, 700.0),
            calcium: (10.0, 200.0),
            response: (0.0, 3.0),
        }
    }
}

impl DisplayRange {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, (min, max)) in [
            ("structural", self.structural),
            ("calcium", self.calcium),
            ("response", self.response),
        ] {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(Error::configuration(format!(
                    "invalid {name} display range ({min}, {max})"
                )));
            }
        }
        Ok(())
    }
}

/// Depth projections of the maps worth looking at, each `[row, col]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedMaps {
    pub calcium_baseline: Array2<f64>,
    pub delta_f_over_f: Array2<f64>,
    pub delta_r_over_r: Array2<f64>,
}

/// Maximum over axis 0 ignoring NAN. A pixel is NAN only if it is NAN at every level.
pub fn nan_max_projection(stack: ArrayView3<f64>) -> Array2<f64> {
    let mut projection = Array2::from_elem((stack.dim().1, stack.dim().2), f64::NAN);
    for level in stack.outer_iter() {
        Zip::from(&mut projection).and(&level).for_each(|p, &v| {
            // f64::max returns the non-NAN operand.
            *p = p.max(v);
        });
    }
    projection
}

#[instrument(skip_all)]
pub fn merge_depths(maps: &ResponseMaps) -> MergedMaps {
    let merged = MergedMaps {
        calcium_baseline: nan_max_projection(maps.calcium_baseline.view()),
        delta_f_over_f: nan_max_projection(maps.delta_f_over_f.view()),
        delta_r_over_r: nan_max_projection(maps.delta_r_over_r.view()),
    };
    info!(
        delta_f_over_f_mean = nan_mean(merged.delta_f_over_f.view()),
        delta_r_over_r_mean = nan_mean(merged.delta_r_over_r.view()),
    );
    merged
}

/// Mean of the non-NAN values, NAN when there are none.
pub fn nan_mean<D: Dimension>(data: ArrayView<f64, D>) -> f64 {
    let (sum, non_nan_cnt, cnt) = data.iter().fold((0., 0, 0), |(sum, non_nan_cnt, cnt), &x| {
        if x.is_nan() {
            (sum, non_nan_cnt, cnt + 1)
        } else {
            (sum + x, non_nan_cnt + 1, cnt + 1)
        }
    });
    if cnt > 0 {
        let nan_ratio = (cnt - non_nan_cnt) as f64 / cnt as f64;
        info!(non_nan_cnt, cnt, nan_ratio);
    }
    if non_nan_cnt == 0 {
        return f64::NAN;
    }
    sum / non_nan_cnt as f64
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::arr3;

    use super::*;

    const NAN: f64 = f64::NAN;

    #[test]
    fn test_nan_max_projection() {
        let stack = arr3(&[[[1.0, NAN, NAN]], [[NAN, NAN, -2.0]], [[3.0, NAN, -5.0]]]);
        let projection = nan_max_projection(stack.view());
        assert_eq!(projection.dim(), (1, 3));
        assert_eq!(projection[[0, 0]], 3.0);
        assert!(projection[[0, 1]].is_nan());
        assert_eq!(projection[[0, 2]], -2.0);
    }

    #[test]
    fn test_merge_depths() {
        let level = |v: f64| Array3::from_elem((2, 2, 2), v);
        let mut delta_f_over_f = level(0.1);
        delta_f_over_f[[1, 0, 1]] = 0.4;
        delta_f_over_f[[0, 1, 1]] = NAN;
        delta_f_over_f[[1, 1, 1]] = NAN;
        let maps = ResponseMaps {
            structural_response: level(1.0),
            calcium_response: level(1.0),
            structural_baseline: level(1.0),
            calcium_baseline: level(20.0),
            ratio_response: level(1.0),
            ratio_baseline: level(1.0),
            delta_f_over_f,
            delta_r_over_r: level(NAN),
        };
        let merged = merge_depths(&maps);
        assert_eq!(merged.calcium_baseline, Array2::from_elem((2, 2), 20.0));
        assert_eq!(merged.delta_f_over_f[[0, 1]], 0.4);
        assert!(merged.delta_f_over_f[[1, 1]].is_nan());
        assert!(merged.delta_r_over_r.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_nan_mean() {
        assert_relative_eq!(nan_mean(arr1(&[1.0, NAN, 3.0]).view()), 2.0);
        assert!(nan_mean(arr1(&[NAN, NAN]).view()).is_nan());
        assert!(nan_mean(Array1::<f64>::zeros(0).view()).is_nan());
    }

    #[test]
    fn test_display_range() {
        DisplayRange::default().validate().unwrap();
        let range = DisplayRange {
            response: (3.0, 0.0),
            ..Default::default()
        };
        assert!(range.validate().is_err());
    }
}
