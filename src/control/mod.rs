// Control law: sensor pair -> motor pair.
pub mod phototaxis;
