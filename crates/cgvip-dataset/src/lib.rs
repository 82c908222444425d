//! Variant dataset codec and approval filter for the CGVIP pipeline.
//!
//! Datasets are either comma-separated text with a header row (quoted fields,
//! doubled-quote escaping, line breaks inside quotes) or a JSON array of
//! objects. Both load into a [`Dataset`] that remembers its serialization, so
//! a filtered dataset is written back the way it was read.
//!
//! ```
//! use cgvip_dataset::{Dataset, FilterMode};
//! use cgvip_types::DatasetFormat;
//!
//! let csv = "variant_id,approved\nv1,true\nv2,false";
//! let dataset = Dataset::parse(csv, DatasetFormat::Csv).unwrap();
//! let approved = dataset.filter(&FilterMode::ApprovedOnly);
//! assert_eq!(approved.len(), 1);
//! assert_eq!(approved.render().unwrap(), "variant_id,approved\nv1,true");
//! ```

pub mod csv;
mod dataset;
mod filter;

pub use csv::{parse_csv, write_csv, CsvTable};
pub use dataset::Dataset;
pub use filter::{filter_and_write, load_variant_ids, FilterMode, FilterReport};
