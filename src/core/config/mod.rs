pub mod data;
pub mod env;
pub mod io;

#[cfg(test)]
pub mod tests;
