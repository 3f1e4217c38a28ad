use std::fs;

use anyhow::{Context, Result};
use gifplay::Gif;

mod ppm_writer;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .context("usage: gifplay <gif file> [output dir]")?;
    let out_dir = args.next().unwrap_or_else(|| String::from("."));

    let bytes = fs::read(&path).with_context(|| format!("could not read {path}"))?;
    let gif = Gif::new(&bytes).with_context(|| format!("could not decode {path}"))?;

    for i in 0..gif.frame_count() {
        let Some(frame) = gif.frame(i) else { break };
        let filename = format!("{out_dir}/frame_{i}.ppm");
        ppm_writer::write_ppm(&filename, gif.width(), gif.height(), frame)?;
        println!("wrote {filename}");
    }

    Ok(())
}
