use lazy_static::lazy_static;
use sersic_posterior::{CatalogRow, read_catalog};

/// Whitespace-separated catalog in the `id ra dec x y a b pa n mag` layout
///
/// Sources 1 and 2 are neighbours a few pixels apart on the synthetic stamp, source 3 is far
/// away and must not be selected into their scene.
pub const SYNTHETIC_CATALOG: &str = "\
# id  ra          dec          x     y     a     b     pa     n    mag
1     53.1000000  -27.8000000  16.0  16.0  0.10  0.05  30.0   2.0  25.0
2     53.1000300  -27.7999700  12.4  19.6  0.08  0.06  120.0  1.5  25.5

3     53.2000000  -27.9000000  0.0   0.0   0.12  0.03  80.0   4.0  24.5
";

lazy_static! {
    pub static ref SYNTHETIC_CATALOG_ROWS: Vec<CatalogRow> =
        read_catalog(SYNTHETIC_CATALOG.as_bytes()).unwrap();
}
