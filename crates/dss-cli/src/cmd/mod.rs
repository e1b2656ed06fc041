pub mod faulty;
pub mod recover;
pub mod run;
pub mod shredder;
pub mod store;
