//! Landmark geometry: per-region point sets and their bounding sizes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Width and height of a region's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Points for each named facial region, as seen from one angle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    regions: BTreeMap<String, Vec<(f64, f64)>>,
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: impl Into<String>, points: Vec<(f64, f64)>) {
        self.regions.insert(region.into(), points);
    }

    pub fn points(&self, region: &str) -> Option<&[(f64, f64)]> {
        self.regions.get(region).map(Vec::as_slice)
    }

    /// Bounding size of one region. `None` when the region is absent or empty.
    pub fn size(&self, region: &str) -> Option<Size> {
        bounding_size(self.regions.get(region)?)
    }

    /// Bounding sizes of every non-empty region.
    pub fn sizes(&self) -> HashMap<String, Size> {
        self.regions
            .iter()
            .filter_map(|(name, pts)| bounding_size(pts).map(|s| (name.clone(), s)))
            .collect()
    }
}

impl FromIterator<(String, Vec<(f64, f64)>)> for LandmarkSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<(f64, f64)>)>>(iter: I) -> Self {
        Self {
            regions: iter.into_iter().collect(),
        }
    }
}

fn bounding_size(points: &[(f64, f64)]) -> Option<Size> {
    let (&(x0, y0), rest) = points.split_first()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (x0, x0, y0, y0);
    for &(x, y) in rest {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    Some(Size {
        width: max_x - min_x,
        height: max_y - min_y,
    })
}

/// Element-wise mean of region sizes across several observations.
///
/// A region only averages over the sets that contain it.
pub fn average_sizes<'a, I>(sets: I) -> HashMap<String, Size>
where
    I: IntoIterator<Item = &'a LandmarkSet>,
{
    let mut sums: HashMap<String, (Size, usize)> = HashMap::new();
    for set in sets {
        for (name, size) in set.sizes() {
            let entry = sums.entry(name).or_insert((
                Size {
                    width: 0.0,
                    height: 0.0,
                },
                0,
            ));
            entry.0.width += size.width;
            entry.0.height += size.height;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, (sum, n))| {
            let n = n as f64;
            (
                name,
                Size {
                    width: sum.width / n,
                    height: sum.height / n,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(width: f64, height: f64) -> Size {
        Size { width, height }
    }

    fn set(entries: &[(&str, &[(f64, f64)])]) -> LandmarkSet {
        entries
            .iter()
            .map(|(n, p)| (n.to_string(), p.to_vec()))
            .collect()
    }

    #[test]
    fn test_calc_sizes() {
        let lm = set(&[
            ("nose", &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]),
            ("eye", &[(0.0, 0.0), (5.0, 0.0)]),
        ]);
        let sizes = lm.sizes();
        assert_eq!(sizes["nose"], size(10.0, 10.0));
        assert_eq!(sizes["eye"], size(5.0, 0.0));
    }

    #[test]
    fn test_size_uses_height_from_y_extent() {
        let lm = set(&[("mouth", &[(3.0, 7.0), (9.0, 8.0), (5.0, 12.0)])]);
        assert_eq!(lm.size("mouth"), Some(size(6.0, 5.0)));
    }

    #[test]
    fn test_empty_or_missing_region_has_no_size() {
        let lm = set(&[("chin", &[])]);
        assert_eq!(lm.size("chin"), None);
        assert_eq!(lm.size("brow"), None);
        assert!(lm.sizes().is_empty());
    }

    #[test]
    fn test_calc_average_sizes() {
        let sets = [
            set(&[("nose", &[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)])]),
            set(&[("nose", &[(0.0, 0.0), (20.0, 0.0), (0.0, 20.0)])]),
        ];
        let avg = average_sizes(&sets);
        assert_eq!(avg["nose"], size(15.0, 15.0));
    }

    #[test]
    fn test_average_skips_sets_without_region() {
        let sets = [
            set(&[("nose", &[(0.0, 0.0), (4.0, 2.0)])]),
            set(&[("eye", &[(0.0, 0.0), (1.0, 1.0)])]),
        ];
        let avg = average_sizes(&sets);
        assert_eq!(avg["nose"], size(4.0, 2.0));
        assert_eq!(avg["eye"], size(1.0, 1.0));
    }

    #[test]
    fn test_landmarks_deserialize_from_point_lists() {
        let lm: LandmarkSet = serde_json::from_str(r#"{"nose": [[1, 2], [4, 6]]}"#).unwrap();
        assert_eq!(lm.size("nose"), Some(size(3.0, 4.0)));
    }
}
