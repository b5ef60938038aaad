mod handler;
mod model;

pub use handler::{nearby_vendors, remove_vendor_location, update_vendor_location};
