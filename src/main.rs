use act_cell::{ActCell, ActConfig, CellState, RecurrentCell};
use clap::Parser;
use ndarray::Array2;
use rand_distr::{Distribution, Normal};

#[derive(Parser, Debug)]
#[command(name = "act-demo")]
#[command(about = "Run Adaptive Computation Time over a toy recurrent cell and report pondering statistics")]
struct Args {
    /// Optional JSON file with an ActConfig (overrides the size flags)
    #[arg(short, long)]
    config: Option<String>,

    /// Hidden state width of the toy cell
    #[arg(long, default_value_t = 16)]
    num_units: usize,

    /// Batch size
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Width of the per-step input
    #[arg(long, default_value_t = 8)]
    input_dim: usize,

    /// Number of outer time steps
    #[arg(short, long, default_value_t = 10)]
    steps: usize,

    /// Halting sigmoid scale
    #[arg(long, default_value_t = 1.0)]
    mu: f32,

    /// Initial halting bias
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    initial_bias: f32,

    /// Iteration ceiling per outer step
    #[arg(long, default_value_t = 100)]
    max_computation: usize,
}

/// `h' = tanh(x·W + h·U)`, output = `h'`.
struct ToyTanhCell {
    w: Array2<f32>,
    u: Array2<f32>,
}

impl ToyTanhCell {
    fn new(input_dim: usize, num_units: usize) -> Self {
        let mut rng = rand::rng();
        let normal_w = Normal::new(0.0, (1.0 / input_dim as f32).sqrt()).unwrap();
        let normal_u = Normal::new(0.0, (1.0 / num_units as f32).sqrt()).unwrap();
        Self {
            w: Array2::from_shape_fn((input_dim, num_units), |_| normal_w.sample(&mut rng)),
            u: Array2::from_shape_fn((num_units, num_units), |_| normal_u.sample(&mut rng)),
        }
    }
}

impl RecurrentCell for ToyTanhCell {
    fn cell_type(&self) -> &str {
        "ToyTanhCell"
    }

    fn step(&mut self, input: &Array2<f32>, state: &CellState) -> act_cell::Result<(Array2<f32>, CellState)> {
        let CellState::Flat(h) = state else {
            return Err(act_cell::ActError::InvalidInput {
                message: "ToyTanhCell only supports flat state".to_string(),
            });
        };
        if input.ncols() != self.w.nrows() {
            return Err(act_cell::ActError::ShapeMismatch {
                context: "ToyTanhCell input".to_string(),
                expected: vec![input.nrows(), self.w.nrows()],
                actual: vec![input.nrows(), input.ncols()],
            });
        }
        let new_h = (input.dot(&self.w) + h.dot(&self.u)).mapv(f32::tanh);
        Ok((new_h.clone(), CellState::Flat(new_h)))
    }
}

fn main() -> act_cell::Result<()> {
    let args = Args::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match &args.config {
        Some(path) => ActConfig::from_file(path)?,
        None => ActConfig::new(args.num_units, args.batch_size)
            .with_mu(args.mu)
            .with_initial_bias(args.initial_bias)
            .with_max_computation(args.max_computation),
    };

    // +1 for the halting flag column ACT prepends to every input
    let cell = ToyTanhCell::new(args.input_dim + 1, config.num_units);
    let mut act = ActCell::new(cell, config)?;

    let mut rng = rand::rng();
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let mut state = act.zero_state();

    for t in 0..args.steps {
        let input = Array2::from_shape_fn((config.batch_size, args.input_dim), |_| normal.sample(&mut rng));
        let (_, next_state) = act.step(&input, &state, t)?;
        state = next_state;

        if let Some(outcome) = act.last_outcome() {
            tracing::info!(
                timestep = t,
                iterations = outcome.num_iterations(),
                mean_steps = outcome.mean_steps(),
                truncated = outcome.truncated,
                "Pondered"
            );
        }
    }

    let cost = act.ponder_cost();
    let weighted = act.weighted_ponder_cost();
    println!("Ponder cost over {} steps: {:.4} (weighted: {:.6})", args.steps, cost, weighted);
    Ok(())
}
