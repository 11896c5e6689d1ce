use std::{
    io::{self, BufRead},
    path::PathBuf,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use tokenizers::Tokenizer;
use transformer::{setup_device, HyperParameters, ModelError, Transformer};

#[derive(Parser)]
#[command(
    name = "transformer",
    about = "Stream prompts through a randomly initialised GPT-style encoder stack",
    version
)]
struct Cli {
    /// Hyper-parameter file (.toml or .json); GPT-2 small layout when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to a Hugging Face tokenizer.json
    #[arg(long, default_value = "tokenizer.json")]
    tokenizer: PathBuf,
    /// Enable dropout with this seed
    #[arg(long)]
    seed: Option<u64>,
    /// Clear the decode state before every prompt instead of continuing it
    #[arg(long)]
    fresh: bool,
    /// Prompts to run; read line by line from stdin when empty
    prompts: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let params = match &cli.config {
        Some(path) => HyperParameters::from_path(path)
            .with_context(|| format!("loading hyper-parameters from {}", path.display()))?,
        None => HyperParameters::default(),
    };
    let tokenizer = Tokenizer::from_file(&cli.tokenizer)
        .map_err(|err| anyhow!("loading tokenizer {}: {err}", cli.tokenizer.display()))?;

    let device = setup_device()?;
    let mut model = Transformer::new(params, &device)?;
    let mut rng = cli.seed.map(StdRng::seed_from_u64);

    let prompts = if cli.prompts.is_empty() {
        io::stdin().lock().lines().collect::<io::Result<Vec<_>>>()?
    } else {
        cli.prompts.clone()
    };

    for prompt in prompts.iter().filter(|p| !p.trim().is_empty()) {
        if cli.fresh {
            model.reset_state();
        }
        let logits = match model.forward_text(&tokenizer, prompt, rng.as_mut()) {
            Err(ModelError::ContextOverflow { requested, context_size }) => {
                log::warn!("context full ({requested} > {context_size}), restarting sequence");
                model.reset_state();
                model.forward_text(&tokenizer, prompt, rng.as_mut())?
            }
            other => other?,
        };

        let (_, steps, _) = logits.dims3()?;
        let next = logits
            .squeeze(0)?
            .get(steps - 1)?
            .argmax(0)?
            .to_scalar::<u32>()?;
        let decoded = tokenizer
            .decode(&[next], true)
            .map_err(|err| anyhow!("decoding token {next}: {err}"))?;
        println!(
            "{prompt:?}: logits {:?}, cached {}, next token {next} {decoded:?}",
            logits.dims(),
            model.cached_len()
        );
    }
    Ok(())
}
