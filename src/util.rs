pub mod atomic_map;
pub mod safe_converter;
