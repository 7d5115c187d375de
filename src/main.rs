use std::{env, fs};

use akid::builder::{ExperimentSpec, KidBuilder};
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let spec = match env::args().nth(1) {
        Some(path) => {
            info!("loading experiment from {path}");
            ExperimentSpec::from_json(&fs::read_to_string(path)?)?
        }
        None => ExperimentSpec::default(),
    };

    let mut kid = KidBuilder::new().build(&spec)?;
    kid.setup()?;
    let precision = kid.practice()?;

    match precision {
        Some(precision) => println!("precision after {} steps: {precision:.4}", kid.step()),
        None => println!("trained for {} steps, loss {:?}", kid.step(), kid.loss()),
    }

    Ok(())
}
