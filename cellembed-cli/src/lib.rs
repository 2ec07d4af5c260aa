pub mod run;
pub mod utility;
