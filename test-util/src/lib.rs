pub use catalog_data::{SYNTHETIC_CATALOG, SYNTHETIC_CATALOG_ROWS};
pub use models::{AnalyticGaussian, EllipticalBlob};
pub use scenes::{PLATE_SCALE_ARCSEC, PreparedScene, prepare_catalog_scene, single_blob_scene};

mod catalog_data;
mod models;
mod scenes;
