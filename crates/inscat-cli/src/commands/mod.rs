pub mod params;
pub mod simulate;
