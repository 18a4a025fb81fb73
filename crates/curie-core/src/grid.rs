use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CurieError, Result};
use crate::filters;

/// Relative tolerance above which unequal node spacings are reported.
const ANISOTROPIC_SPACING_TOLERANCE: f64 = 1e-3;
/// Slack, in node spacings, for coordinates that land on a node.
const SNAP_TOLERANCE: f64 = 1e-9;

/// A regular 2D grid of magnetic anomaly values (nT), row-major.
///
/// Row 0 lies at `ymin`, column 0 at `xmin`. Coordinates are in metres.
/// Values must be finite; masked nodes have to be filled before a grid
/// can be built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct MagneticGrid {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
}

#[derive(Deserialize)]
struct RawGrid {
    data: Vec<f64>,
    nx: usize,
    ny: usize,
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
}

impl TryFrom<RawGrid> for MagneticGrid {
    type Error = CurieError;

    fn try_from(raw: RawGrid) -> Result<Self> {
        MagneticGrid::new(raw.data, raw.nx, raw.ny, raw.xmin, raw.xmax, raw.ymin, raw.ymax)
    }
}

impl MagneticGrid {
    /// Build a grid from row-major values and its coordinate extent.
    pub fn new(
        data: Vec<f64>,
        nx: usize,
        ny: usize,
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
    ) -> Result<Self> {
        if nx < 2 || ny < 2 {
            return Err(CurieError::InvalidGrid(format!(
                "grid must have at least 2x2 nodes, got {nx}x{ny}"
            )));
        }
        if data.len() != nx * ny {
            return Err(CurieError::InvalidGrid(format!(
                "expected {} values for a {nx}x{ny} grid, got {}",
                nx * ny,
                data.len()
            )));
        }
        if ![xmin, xmax, ymin, ymax].iter().all(|v| v.is_finite()) || xmax <= xmin || ymax <= ymin {
            return Err(CurieError::InvalidGrid(format!(
                "extent x {xmin}..{xmax}, y {ymin}..{ymax} is not increasing"
            )));
        }
        if let Some(i) = data.iter().position(|v| !v.is_finite()) {
            return Err(CurieError::InvalidGrid(format!(
                "value at row {}, column {} is not finite",
                i / nx,
                i % nx
            )));
        }

        let grid = Self { data, nx, ny, xmin, xmax, ymin, ymax };
        let (dx, dy) = (grid.dx(), grid.dy());
        if (dx - dy).abs() > ANISOTROPIC_SPACING_TOLERANCE * dx.max(dy) {
            warn!(dx, dy, "node spacing differs between axes; windows are sized from dx");
        }
        Ok(grid)
    }

    /// Build a grid from a list of rows, the first row at `ymin`.
    pub fn from_rows(rows: &[Vec<f64>], xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<Self> {
        let ny = rows.len();
        let nx = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != nx) {
            return Err(CurieError::InvalidGrid("rows have unequal lengths".into()));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::new(data, nx, ny, xmin, xmax, ymin, ymax)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.nx + col]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// `(xmin, xmax, ymin, ymax)` in metres.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        (self.xmin, self.xmax, self.ymin, self.ymax)
    }

    /// Node spacing along x.
    pub fn dx(&self) -> f64 {
        (self.xmax - self.xmin) / (self.nx - 1) as f64
    }

    /// Node spacing along y.
    pub fn dy(&self) -> f64 {
        (self.ymax - self.ymin) / (self.ny - 1) as f64
    }

    #[inline]
    pub fn x_coord(&self, col: usize) -> f64 {
        self.xmin + col as f64 * self.dx()
    }

    #[inline]
    pub fn y_coord(&self, row: usize) -> f64 {
        self.ymin + row as f64 * self.dy()
    }

    /// Column whose x coordinate is nearest to `x`; ties go to the lower index.
    pub fn nearest_col(&self, x: f64) -> usize {
        nearest_index(x, self.xmin, self.dx(), self.nx)
    }

    /// Row whose y coordinate is nearest to `y`; ties go to the lower index.
    pub fn nearest_row(&self, y: f64) -> usize {
        nearest_index(y, self.ymin, self.dy(), self.ny)
    }

    /// Half-width in nodes of the smallest node range enclosing a square
    /// window of physical size `window`.
    fn half_width(&self, window: f64) -> Result<usize> {
        if !window.is_finite() || window <= 0.0 {
            return Err(CurieError::invalid_parameter("window", window, "must be positive"));
        }
        Ok((0.5 * window / self.dx() - SNAP_TOLERANCE).ceil().max(1.0) as usize)
    }

    /// Extract the square window of physical size `window` centred on the
    /// node nearest to `(xc, yc)`.
    ///
    /// The window spans `[xc − window/2, xc + window/2]` (likewise in y),
    /// widened to the nearest enclosing node range: `2 ⌈window / 2dx⌉ + 1`
    /// nodes per side. A request reaching past the grid extent, or whose
    /// node range would, is an [`CurieError::OutOfBounds`] error.
    pub fn subgrid(&self, window: f64, xc: f64, yc: f64) -> Result<Window> {
        let out_of_bounds = || CurieError::OutOfBounds { x: xc, y: yc, window };
        if !xc.is_finite() || !yc.is_finite() {
            return Err(out_of_bounds());
        }
        let half = self.half_width(window)?;

        let r = 0.5 * window;
        let tol = SNAP_TOLERANCE * (self.dx() + self.dy());
        if xc - r < self.xmin - tol || xc + r > self.xmax + tol || yc - r < self.ymin - tol || yc + r > self.ymax + tol {
            return Err(out_of_bounds());
        }

        let col = self.nearest_col(xc);
        let row = self.nearest_row(yc);
        if col < half || row < half || col + half >= self.nx || row + half >= self.ny {
            return Err(out_of_bounds());
        }

        let size = 2 * half + 1;
        let (col0, row0) = (col - half, row - half);
        let mut data = Vec::with_capacity(size * size);
        for r in row0..row0 + size {
            let start = r * self.nx + col0;
            data.extend_from_slice(&self.data[start..start + size]);
        }

        Ok(Window {
            data,
            size,
            dx: self.dx(),
            dy: self.dy(),
            x0: self.x_coord(col0),
            y0: self.y_coord(row0),
        })
    }

    /// All window centres for which a window of size `window` fits inside the
    /// grid. Without spacings every interior node is a centre; with a spacing
    /// the centres run from the first to the last interior node in steps of
    /// that spacing.
    pub fn centroid_list(&self, window: f64, spacing_x: Option<f64>, spacing_y: Option<f64>) -> Result<CentroidList> {
        let half = self.half_width(window)?;
        let tol = SNAP_TOLERANCE * (self.dx() + self.dy());
        if window > self.xmax - self.xmin + tol || window > self.ymax - self.ymin + tol || 2 * half + 1 > self.nx || 2 * half + 1 > self.ny {
            return Err(CurieError::invalid_parameter(
                "window",
                window,
                "larger than the grid, no centroid fits",
            ));
        }

        let xs = axis_centres(
            self.x_coord(half),
            self.x_coord(self.nx - 1 - half),
            (half..self.nx - half).map(|c| self.x_coord(c)),
            spacing_x,
            "spacing_x",
        )?;
        let ys = axis_centres(
            self.y_coord(half),
            self.y_coord(self.ny - 1 - half),
            (half..self.ny - half).map(|r| self.y_coord(r)),
            spacing_y,
            "spacing_y",
        )?;
        Ok(CentroidList { xs, ys })
    }

    /// Upward-continue the whole grid by `height` metres.
    pub fn upward_continued(&self, height: f64) -> Result<MagneticGrid> {
        let data = filters::upward_continuation(self, height)?;
        Ok(self.with_data(data))
    }

    /// Reduce the whole grid to the magnetic pole.
    pub fn reduced_to_pole(&self, field: Direction, magnetization: Direction) -> Result<MagneticGrid> {
        let data = filters::reduce_to_pole(self, field, magnetization)?;
        Ok(self.with_data(data))
    }

    fn with_data(&self, data: Vec<f64>) -> MagneticGrid {
        MagneticGrid {
            data,
            nx: self.nx,
            ny: self.ny,
            xmin: self.xmin,
            xmax: self.xmax,
            ymin: self.ymin,
            ymax: self.ymax,
        }
    }
}

/// Inclination and declination of a field or magnetization vector, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub inclination: f64,
    pub declination: f64,
}

/// Extract a window; a free-function form of [`MagneticGrid::subgrid`].
pub fn windowed_subgrid(grid: &MagneticGrid, window: f64, xc: f64, yc: f64) -> Result<Window> {
    grid.subgrid(window, xc, yc)
}

fn nearest_index(v: f64, origin: f64, spacing: f64, n: usize) -> usize {
    let f = (v - origin) / spacing;
    // Round half down so that ties resolve to the first node.
    let idx = (f - 0.5).ceil().max(0.0) as usize;
    idx.min(n - 1)
}

fn axis_centres(
    first: f64,
    last: f64,
    nodes: impl ExactSizeIterator<Item = f64>,
    spacing: Option<f64>,
    name: &'static str,
) -> Result<Vec<f64>> {
    match spacing {
        None => Ok(nodes.collect()),
        Some(s) if s.is_finite() && s > 0.0 => {
            let steps = ((last - first) / s + SNAP_TOLERANCE).floor();
            // Finer than the node spacing would only repeat windows.
            if steps + 1.0 > nodes.len() as f64 {
                return Err(CurieError::invalid_parameter(name, s, "finer than the node spacing"));
            }
            Ok((0..=steps as usize).map(|i| (first + i as f64 * s).min(last)).collect())
        }
        Some(s) => Err(CurieError::invalid_parameter(name, s, "must be positive")),
    }
}

/// A square sub-array of a grid, ready for spectral analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    data: Vec<f64>,
    size: usize,
    dx: f64,
    dy: f64,
    x0: f64,
    y0: f64,
}

impl Window {
    /// Wrap caller-supplied square data of `size * size` values.
    pub fn new(data: Vec<f64>, size: usize, dx: f64, dy: f64) -> Result<Self> {
        if size < 2 || data.len() != size * size {
            return Err(CurieError::InvalidGrid(format!(
                "window needs {size}x{size} values, got {}",
                data.len()
            )));
        }
        if !(dx.is_finite() && dx > 0.0 && dy.is_finite() && dy > 0.0) {
            return Err(CurieError::InvalidGrid(format!("spacing {dx} x {dy} must be positive")));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(CurieError::InvalidGrid("window contains non-finite values".into()));
        }
        Ok(Self { data, size, dx, dy, x0: 0.0, y0: 0.0 })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.size + col]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of nodes along each side.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn dy(&self) -> f64 {
        self.dy
    }

    /// Coordinates of the central node.
    pub fn centre(&self) -> (f64, f64) {
        let half = (self.size / 2) as f64;
        (self.x0 + half * self.dx, self.y0 + half * self.dy)
    }

    /// The window as a grid of its own, in the parent grid's coordinates.
    pub fn to_grid(&self) -> Result<MagneticGrid> {
        let span = (self.size - 1) as f64;
        MagneticGrid::new(
            self.data.clone(),
            self.size,
            self.size,
            self.x0,
            self.x0 + span * self.dx,
            self.y0,
            self.y0 + span * self.dy,
        )
    }

    /// A copy with the least-squares plane removed.
    pub fn detrended(&self) -> Result<Window> {
        let data = filters::remove_linear_trend(&self.data, self.size, self.size)?;
        Ok(Window { data, ..self.clone() })
    }
}

/// Window centres on the product of two coordinate axes.
///
/// Index `i` maps to `(xs[i % nx], ys[i / nx])`, so rows of the result
/// field follow y.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidList {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl CentroidList {
    pub fn len(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> (f64, f64) {
        let nx = self.xs.len();
        (self.xs[i % nx], self.ys[i / nx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ys.iter().flat_map(move |&y| self.xs.iter().map(move |&x| (x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(nx: usize, ny: usize, dx: f64) -> MagneticGrid {
        let data = (0..nx * ny).map(|i| i as f64).collect();
        MagneticGrid::new(data, nx, ny, 0.0, (nx - 1) as f64 * dx, 0.0, (ny - 1) as f64 * dx).unwrap()
    }

    #[test]
    fn new_rejects_mismatched_length_and_non_finite_values() {
        assert!(matches!(
            MagneticGrid::new(vec![0.0; 5], 2, 2, 0.0, 1.0, 0.0, 1.0),
            Err(CurieError::InvalidGrid(_))
        ));
        assert!(matches!(
            MagneticGrid::new(vec![0.0, f64::NAN, 0.0, 0.0], 2, 2, 0.0, 1.0, 0.0, 1.0),
            Err(CurieError::InvalidGrid(_))
        ));
        assert!(matches!(
            MagneticGrid::new(vec![0.0; 4], 2, 2, 1.0, 0.0, 0.0, 1.0),
            Err(CurieError::InvalidGrid(_))
        ));
    }

    #[test]
    fn spacing_follows_extent() {
        let g = ramp(11, 6, 1000.0);
        assert_relative_eq!(g.dx(), 1000.0);
        assert_relative_eq!(g.dy(), 1000.0);
        assert_relative_eq!(g.x_coord(10), 10_000.0);
        assert_eq!(g.nearest_col(1499.0), 1);
        assert_eq!(g.nearest_col(1500.0), 1);
        assert_eq!(g.nearest_col(1501.0), 2);
    }

    #[test]
    fn subgrid_is_centred_on_nearest_node() {
        let g = ramp(21, 21, 1000.0);
        let w = g.subgrid(4000.0, 10_200.0, 9_900.0).unwrap();
        assert_eq!(w.size(), 5);
        // Centre node is (row 10, col 10).
        assert_eq!(w.get(2, 2), g.get(10, 10));
        assert_eq!(w.get(0, 0), g.get(8, 8));
        let (cx, cy) = w.centre();
        assert_relative_eq!(cx, 10_000.0);
        assert_relative_eq!(cy, 10_000.0);
    }

    #[test]
    fn subgrid_outside_grid_fails() {
        let g = ramp(21, 21, 1000.0);
        assert!(matches!(
            g.subgrid(4000.0, 1000.0, 10_000.0),
            Err(CurieError::OutOfBounds { .. })
        ));
        assert!(matches!(
            g.subgrid(4000.0, 50_000.0, 10_000.0),
            Err(CurieError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn subgrid_spanning_whole_grid_succeeds() {
        let g = ramp(305, 305, 1000.0);
        let w = g.subgrid(304_000.0, 152_000.0, 152_000.0).unwrap();
        assert_eq!(w.size(), 305);
        assert_eq!(w.data(), g.data());
    }

    #[test]
    fn window_wider_than_grid_is_out_of_bounds() {
        let g = ramp(305, 305, 1000.0);
        assert!(matches!(
            windowed_subgrid(&g, 305_400.0, 152_000.0, 152_000.0),
            Err(CurieError::OutOfBounds { .. })
        ));
        assert!(matches!(
            windowed_subgrid(&g, 305_000.0, 152_000.0, 152_000.0),
            Err(CurieError::OutOfBounds { .. })
        ));
        // Reaches 1 km past the western edge.
        assert!(matches!(
            windowed_subgrid(&g, 100_000.0, 49_000.0, 152_000.0),
            Err(CurieError::OutOfBounds { .. })
        ));
        assert!(windowed_subgrid(&g, 100_000.0, 50_000.0, 152_000.0).is_ok());
    }

    #[test]
    fn odd_request_is_widened_to_enclosing_nodes() {
        let g = ramp(21, 21, 1000.0);
        let w = windowed_subgrid(&g, 3000.0, 10_000.0, 10_000.0).unwrap();
        assert_eq!(w.size(), 5);
        assert!((w.size() - 1) as f64 * w.dx() >= 3000.0);
        assert_eq!(w.get(0, 0), g.get(8, 8));
        assert_eq!(windowed_subgrid(&g, 4000.0, 10_000.0, 10_000.0).unwrap().size(), 5);
        assert_eq!(windowed_subgrid(&g, 4001.0, 10_000.0, 10_000.0).unwrap().size(), 7);
    }

    #[test]
    fn rewindowing_at_the_window_centre_returns_the_same_window() {
        let g = ramp(41, 41, 500.0);
        let w = windowed_subgrid(&g, 6000.0, 9_800.0, 11_100.0).unwrap();
        assert_eq!(windowed_subgrid(&g, 6000.0, 9_800.0, 11_100.0).unwrap(), w);

        let (cx, cy) = w.centre();
        let again = windowed_subgrid(&w.to_grid().unwrap(), 6000.0, cx, cy).unwrap();
        assert_eq!(again.size(), w.size());
        assert_eq!(again.data(), w.data());
        assert_relative_eq!(again.dx(), w.dx());
        let (ax, ay) = again.centre();
        assert_relative_eq!(ax, cx);
        assert_relative_eq!(ay, cy);
    }

    #[test]
    fn spacing_finer_than_nodes_is_rejected() {
        let g = ramp(21, 21, 1000.0);
        assert!(matches!(
            g.centroid_list(4000.0, Some(1e-6), None),
            Err(CurieError::InvalidParameter { name: "spacing_x", .. })
        ));
        assert_eq!(g.centroid_list(4000.0, Some(1000.0), Some(1000.0)).unwrap().len(), 17 * 17);
    }

    #[test]
    fn centroid_list_covers_interior_nodes() {
        let g = ramp(21, 11, 1000.0);
        let c = g.centroid_list(4000.0, None, None).unwrap();
        assert_eq!(c.xs.len(), 17);
        assert_eq!(c.ys.len(), 7);
        assert_relative_eq!(c.xs[0], 2000.0);
        assert_relative_eq!(*c.xs.last().unwrap(), 18_000.0);
        for (x, y) in c.iter() {
            assert!(g.subgrid(4000.0, x, y).is_ok());
        }
    }

    #[test]
    fn centroid_list_with_spacing_is_inclusive() {
        let g = ramp(21, 21, 1000.0);
        let c = g.centroid_list(4000.0, Some(4000.0), Some(8000.0)).unwrap();
        assert_eq!(c.xs, vec![2000.0, 6000.0, 10_000.0, 14_000.0, 18_000.0]);
        assert_eq!(c.ys, vec![2000.0, 10_000.0, 18_000.0]);
        assert_eq!(c.len(), 15);
        assert_eq!(c.get(6), (6000.0, 10_000.0));
    }

    #[test]
    fn window_larger_than_grid_has_no_centroids() {
        let g = ramp(11, 11, 1000.0);
        assert!(matches!(
            g.centroid_list(20_000.0, None, None),
            Err(CurieError::InvalidParameter { name: "window", .. })
        ));
    }

    #[test]
    fn deserialization_validates_grid() {
        let bad = r#"{"data":[1.0,2.0,3.0],"nx":2,"ny":2,"xmin":0,"xmax":1,"ymin":0,"ymax":1}"#;
        assert!(serde_json::from_str::<MagneticGrid>(bad).is_err());
        let good = r#"{"data":[1.0,2.0,3.0,4.0],"nx":2,"ny":2,"xmin":0,"xmax":1,"ymin":0,"ymax":1}"#;
        let g: MagneticGrid = serde_json::from_str(good).unwrap();
        assert_eq!(g.get(1, 0), 3.0);
    }
}
