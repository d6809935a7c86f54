pub mod energy;
pub mod inspect;
pub mod run;
