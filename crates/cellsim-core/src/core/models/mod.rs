pub mod ids;
pub mod molecule;
pub mod reaction;
pub mod species;
