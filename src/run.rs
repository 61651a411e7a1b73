//! Driver harness: per-rank run loop and the multi-rank launcher
//!
//! [`run`] performs one rank's full problem: size the rank's share of the
//! grid, allocate and initialize the state pair, construct the sweeper,
//! iterate sweeps with the input/output roles swapping each iteration, and
//! reduce norms, flops, and timing across ranks. [`launch`] wires that to an
//! environment: a trivial one for a single rank, or one OS thread per rank
//! over the in-process grid.

use tracing::info;

use crate::args::Args;
use crate::dims::{ceil_div, rank_base, rank_extent, Dims, StateIndexer};
use crate::env::{Env, EnvError, SerialEnv, ThreadedEnv};
use crate::quantities::{ManufacturedQuantities, Quantities};
use crate::state::{initialize_state, initialize_state_zero, state_norms};
use crate::sweeper::{ConfigError, Sweeper, SweeperConfig};
use crate::{ArgsError, NM, NOCTANT, NU};

/// Problem and decomposition parameters, one value per driver flag.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Global cell counts.
    pub nx: usize,
    /// Global cell counts.
    pub ny: usize,
    /// Global cell counts.
    pub nz: usize,
    /// Energy groups.
    pub ne: usize,
    /// Angles per octant.
    pub na: usize,
    /// Sweeps to perform.
    pub niterations: usize,
    /// z-blocks per rank.
    pub nblock_z: usize,
    /// Ranks along x.
    pub nproc_x: usize,
    /// Ranks along y.
    pub nproc_y: usize,
    /// Semi-blocks per block; defaults to `nthread_octant`.
    pub nsemiblock: Option<usize>,
    /// Workers in the energy-parallel team.
    pub nthread_e: usize,
    /// Octant slots processed together (also `noctant_per_block`).
    pub nthread_octant: usize,
    /// Wavefront lanes along y.
    pub nthread_y: usize,
    /// Wavefront lanes along z.
    pub nthread_z: usize,
    /// Sub-block tile extent along x; defaults to the rank's x extent.
    pub ncell_x_per_subblock: Option<usize>,
    /// Sub-block tile extent along y; defaults to a per-lane share.
    pub ncell_y_per_subblock: Option<usize>,
    /// Sub-block tile extent along z; defaults to a per-lane share.
    pub ncell_z_per_subblock: Option<usize>,
    /// Accumulate into a zeroed output instead of first-touch assignment.
    pub use_atomic_vo: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            nx: 5,
            ny: 5,
            nz: 5,
            ne: 30,
            na: 33,
            niterations: 1,
            nblock_z: 1,
            nproc_x: 1,
            nproc_y: 1,
            nsemiblock: None,
            nthread_e: 1,
            nthread_octant: 1,
            nthread_y: 1,
            nthread_z: 1,
            ncell_x_per_subblock: None,
            ncell_y_per_subblock: None,
            ncell_z_per_subblock: None,
            use_atomic_vo: false,
        }
    }
}

/// Driver failures: argument, configuration, or environment.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Malformed command line.
    #[error(transparent)]
    Args(#[from] ArgsError),
    /// Inconsistent problem or decomposition parameters.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Neighbour exchange or reduction failure.
    #[error(transparent)]
    Env(#[from] EnvError),
}

fn positive(v: i64, name: &'static str) -> Result<usize, ConfigError> {
    if v <= 0 {
        return Err(ConfigError::NonPositive { name, got: v });
    }
    Ok(v as usize)
}

fn non_negative(v: i64, name: &'static str) -> Result<usize, ConfigError> {
    if v < 0 {
        return Err(ConfigError::NonPositive { name, got: v });
    }
    Ok(v as usize)
}

fn power_of_two_slot(v: i64, name: &'static str) -> Result<usize, ConfigError> {
    let v = positive(v, name)?;
    if !matches!(v, 1 | 2 | 4 | 8) {
        return Err(ConfigError::BadPowerOfTwo { name, got: v });
    }
    Ok(v)
}

impl RunConfig {
    /// Consume every driver flag. The caller finishes the argument list so
    /// leftovers abort.
    pub fn from_args(args: &mut Args) -> Result<Self, RunError> {
        let nx = positive(args.consume_i64_or("--nx", 5)?, "--nx")?;
        let ny = positive(args.consume_i64_or("--ny", 5)?, "--ny")?;
        let nz = positive(args.consume_i64_or("--nz", 5)?, "--nz")?;
        let ne = positive(args.consume_i64_or("--ne", 30)?, "--ne")?;
        let na = positive(args.consume_i64_or("--na", 33)?, "--na")?;
        let niterations =
            non_negative(args.consume_i64_or("--niterations", 1)?, "--niterations")?;
        let nblock_z = positive(args.consume_i64_or("--nblock_z", 1)?, "--nblock_z")?;
        let nproc_x = positive(args.consume_i64_or("--nproc_x", 1)?, "--nproc_x")?;
        let nproc_y = positive(args.consume_i64_or("--nproc_y", 1)?, "--nproc_y")?;
        let nthread_e = positive(args.consume_i64_or("--nthread_e", 1)?, "--nthread_e")?;
        let nthread_octant =
            power_of_two_slot(args.consume_i64_or("--nthread_octant", 1)?, "--nthread_octant")?;
        let nthread_y = positive(args.consume_i64_or("--nthread_y", 1)?, "--nthread_y")?;
        let nthread_z = positive(args.consume_i64_or("--nthread_z", 1)?, "--nthread_z")?;

        let nsemiblock = args
            .consume_i64("--nsemiblock")?
            .map(|v| power_of_two_slot(v, "--nsemiblock"))
            .transpose()?;
        let ncell_x_per_subblock = args
            .consume_i64("--ncell_x_per_subblock")?
            .map(|v| positive(v, "--ncell_x_per_subblock"))
            .transpose()?;
        let ncell_y_per_subblock = args
            .consume_i64("--ncell_y_per_subblock")?
            .map(|v| positive(v, "--ncell_y_per_subblock"))
            .transpose()?;
        let ncell_z_per_subblock = args
            .consume_i64("--ncell_z_per_subblock")?
            .map(|v| positive(v, "--ncell_z_per_subblock"))
            .transpose()?;

        let is_using_device =
            non_negative(args.consume_i64_or("--is_using_device", 0)?, "--is_using_device")?;
        if is_using_device != 0 {
            return Err(ConfigError::DeviceUnavailable.into());
        }

        Ok(RunConfig {
            nx,
            ny,
            nz,
            ne,
            na,
            niterations,
            nblock_z,
            nproc_x,
            nproc_y,
            nsemiblock,
            nthread_e,
            nthread_octant,
            nthread_y,
            nthread_z,
            ncell_x_per_subblock,
            ncell_y_per_subblock,
            ncell_z_per_subblock,
            use_atomic_vo: false,
        })
    }
}

/// Result of one run, reduced across all ranks.
#[derive(Copy, Clone, Debug)]
pub struct RunData {
    /// Squared norm of the output state.
    pub normsq: f64,
    /// Squared difference between the two state arrays.
    pub normsqdiff: f64,
    /// Floating-point operations performed.
    pub flops: f64,
    /// GF/s over the sweep loop.
    pub floprate: f64,
    /// Wall seconds over the sweep loop.
    pub time: f64,
}

impl RunData {
    /// Whether the output matched the manufactured solution exactly.
    pub fn pass(&self) -> bool {
        self.normsqdiff == 0.0
    }
}

/// Perform this rank's share of the problem.
pub fn run<E: Env>(env: &E, cfg: &RunConfig) -> Result<RunData, RunError> {
    if cfg.nx < cfg.nproc_x {
        return Err(
            ConfigError::GridTooFine { axis: "x", nproc: cfg.nproc_x, ncell: cfg.nx }.into()
        );
    }
    if cfg.ny < cfg.nproc_y {
        return Err(
            ConfigError::GridTooFine { axis: "y", nproc: cfg.nproc_y, ncell: cfg.ny }.into()
        );
    }

    let dims_g =
        Dims { ncell_x: cfg.nx, ncell_y: cfg.ny, ncell_z: cfg.nz, ne: cfg.ne, nm: NM, na: cfg.na };
    let dims = Dims {
        ncell_x: rank_extent(cfg.nx, env.nproc_x(), env.proc_x()),
        ncell_y: rank_extent(cfg.ny, env.nproc_y(), env.proc_y()),
        ncell_z: cfg.nz,
        ne: cfg.ne,
        nm: NM,
        na: cfg.na,
    };
    let ix_base = rank_base(cfg.nx, env.nproc_x(), env.proc_x());
    let iy_base = rank_base(cfg.ny, env.nproc_y(), env.proc_y());

    // Per-block z extent for the sub-block defaults; divisibility itself is
    // validated at sweeper construction.
    let ncell_z_per_block =
        if cfg.nz % cfg.nblock_z == 0 { cfg.nz / cfg.nblock_z } else { 1 };

    let scfg = SweeperConfig {
        nblock_z: cfg.nblock_z,
        noctant_per_block: cfg.nthread_octant,
        nsemiblock: cfg.nsemiblock.unwrap_or(cfg.nthread_octant),
        nthread_e: cfg.nthread_e,
        nthread_y: cfg.nthread_y,
        nthread_z: cfg.nthread_z,
        ncell_x_per_subblock: cfg.ncell_x_per_subblock.unwrap_or(dims.ncell_x),
        ncell_y_per_subblock: cfg
            .ncell_y_per_subblock
            .unwrap_or_else(|| ceil_div(dims.ncell_y, cfg.nthread_y).max(1)),
        ncell_z_per_subblock: cfg
            .ncell_z_per_subblock
            .unwrap_or_else(|| ceil_div(ncell_z_per_block, cfg.nthread_z).max(1)),
        use_atomic_vo: cfg.use_atomic_vo,
    };

    let quan = ManufacturedQuantities::new();
    let sx = StateIndexer::new(dims);
    let mut vi = vec![0.0; sx.total_len()];
    let mut vo = vec![0.0; sx.total_len()];
    initialize_state(&mut vi, &dims, ix_base, iy_base, &quan);
    initialize_state_zero(&mut vo);

    let mut sweeper = Sweeper::new(scfg, dims_g, dims, ix_base, iy_base, env, &quan)?;

    let t1 = env.synced_time();
    for iteration in 0..cfg.niterations {
        if iteration % 2 == 0 {
            sweeper.sweep(&mut vo, &vi, &quan, env)?;
        } else {
            sweeper.sweep(&mut vi, &vo, &quan, env)?;
        }
    }
    let t2 = env.synced_time();
    let time = t2.duration_since(t1).as_secs_f64();

    let transform_flops = dims.size_state(NU) as f64 * NOCTANT as f64 * 2.0 * dims.na as f64;
    let solve_flops = dims.size_state_angles(NU) as f64 * quan.flops_per_solve(&dims);
    let flops = env.sum_d(cfg.niterations as f64 * (transform_flops + solve_flops + transform_flops));
    let floprate = if time <= 0.0 { 0.0 } else { flops / time / 1.0e9 };

    let (normsq_local, normsqdiff_local) = state_norms(&vi, &vo);
    let normsq = env.sum_d(normsq_local);
    let normsqdiff = env.sum_d(normsqdiff_local);

    info!(normsq, normsqdiff, time, floprate, "run complete");
    Ok(RunData { normsq, normsqdiff, flops, floprate, time })
}

/// Run the whole problem: directly for a single rank, or with one OS thread
/// per rank over the in-process grid. Returns the globally reduced result.
pub fn launch(cfg: &RunConfig) -> Result<RunData, RunError> {
    if cfg.nproc_x * cfg.nproc_y == 1 {
        return run(&SerialEnv, cfg);
    }

    let envs = ThreadedEnv::grid(cfg.nproc_x, cfg.nproc_y);
    std::thread::scope(|scope| {
        let handles: Vec<_> =
            envs.into_iter().map(|env| scope.spawn(move || run(&env, cfg))).collect();
        let mut first = None;
        for h in handles {
            let data = match h.join() {
                Ok(result) => result?,
                Err(payload) => std::panic::resume_unwind(payload),
            };
            if first.is_none() {
                first = Some(data);
            }
        }
        Ok(first.expect("grid has at least one rank"))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(s: &str) -> RunConfig {
        let mut args = Args::parse_str(s);
        let cfg = RunConfig::from_args(&mut args).unwrap();
        args.finish().unwrap();
        cfg
    }

    #[test]
    fn small_problem_is_an_exact_pass() {
        let cfg =
            config_from("--nx 3 --ny 5 --nz 6 --ne 2 --na 5 --nblock_z 2 --nproc_x 1 --niterations 1");
        let data = launch(&cfg).unwrap();
        assert_eq!(data.normsqdiff, 0.0);
        assert!(data.pass());
        assert!(data.normsq > 0.0);
    }

    #[test]
    fn repeated_runs_in_one_process_agree() {
        let cfg = config_from("--nx 3 --ny 5 --nz 6 --ne 2 --na 5 --nblock_z 2");
        let a = launch(&cfg).unwrap();
        let b = launch(&cfg).unwrap();
        assert!(a.pass() && b.pass());
        assert_eq!(a.normsq.to_bits(), b.normsq.to_bits());
    }

    #[test]
    fn normsq_is_stable_across_octant_threading() {
        let base = config_from("--nx 5 --ny 5 --nz 5 --ne 6 --na 33 --niterations 2");
        let reference = launch(&base).unwrap();
        assert!(reference.pass());
        for nthread_octant in [2usize, 4, 8] {
            let mut cfg = base.clone();
            cfg.nthread_octant = nthread_octant;
            let data = launch(&cfg).unwrap();
            assert!(data.pass(), "nthread_octant {nthread_octant}");
            assert_eq!(
                data.normsq, reference.normsq,
                "normsq drifted at nthread_octant {nthread_octant}"
            );
        }
    }

    #[test]
    fn normsq_is_stable_across_z_blocking() {
        let mut reference = None;
        for nblock_z in [1usize, 2, 4, 8] {
            let cfg = config_from(&format!(
                "--nx 4 --ny 4 --nz 8 --ne 2 --na 5 --nblock_z {nblock_z} --niterations 1"
            ));
            let data = launch(&cfg).unwrap();
            assert!(data.pass(), "nblock_z {nblock_z}");
            match reference {
                None => reference = Some(data.normsq),
                Some(r) => assert_eq!(data.normsq, r, "nblock_z {nblock_z}"),
            }
        }
    }

    #[test]
    fn zero_iterations_leave_the_output_zero() {
        let cfg = config_from("--nx 3 --ny 3 --nz 3 --ne 1 --na 1 --niterations 0");
        let data = launch(&cfg).unwrap();
        assert_eq!(data.normsq, 0.0, "output state must stay zero");
        assert!(data.normsqdiff > 0.0);
    }

    #[test]
    fn odd_extent_with_semiblocking_masks_the_overhang() {
        let cfg = config_from(
            "--nx 5 --ny 4 --nz 4 --ne 2 --na 3 --nsemiblock 2 --nthread_octant 2 --niterations 1",
        );
        let data = launch(&cfg).unwrap();
        assert!(data.pass());
    }

    #[test]
    fn masked_angle_lanes_do_not_pollute_moments() {
        // na far from the angle-tile width: most of the last tile is masked,
        // and stale lane contents from earlier cells must never leak.
        for na in [1usize, 5, 9] {
            let cfg = config_from(&format!("--nx 3 --ny 3 --nz 4 --ne 2 --na {na}"));
            let data = launch(&cfg).unwrap();
            assert!(data.pass(), "na {na}");
        }
    }

    #[test]
    fn rank_pipeline_matches_the_serial_answer() {
        let serial =
            launch(&config_from("--nx 4 --ny 5 --nz 6 --ne 2 --na 5 --nblock_z 3")).unwrap();
        for grid in ["--nproc_x 2", "--nproc_y 2", "--nproc_x 2 --nproc_y 2"] {
            let cfg = config_from(&format!(
                "--nx 4 --ny 5 --nz 6 --ne 2 --na 5 --nblock_z 3 {grid}"
            ));
            let data = launch(&cfg).unwrap();
            assert!(data.pass(), "{grid}");
            assert_eq!(data.normsq, serial.normsq, "{grid}");
        }
    }

    #[test]
    fn folded_pipelines_cross_ranks_in_both_directions() {
        // Folding sends half the octants through the grid backwards.
        for nthread_octant in [2usize, 8] {
            let cfg = config_from(&format!(
                "--nx 6 --ny 3 --nz 4 --ne 1 --na 3 --nblock_z 2 --nproc_x 3 \
                 --nthread_octant {nthread_octant}"
            ));
            let data = launch(&cfg).unwrap();
            assert!(data.pass(), "nthread_octant {nthread_octant}");
        }
    }

    #[test]
    fn energy_team_size_does_not_change_the_answer() {
        let one = launch(&config_from("--nx 3 --ny 3 --nz 4 --ne 7 --na 5")).unwrap();
        let four =
            launch(&config_from("--nx 3 --ny 3 --nz 4 --ne 7 --na 5 --nthread_e 4")).unwrap();
        assert!(one.pass() && four.pass());
        assert_eq!(one.normsq, four.normsq);
    }

    #[test]
    fn wavefront_lanes_and_tiles_do_not_change_the_answer() {
        let reference = launch(&config_from("--nx 4 --ny 6 --nz 8 --ne 2 --na 3")).unwrap();
        let tiled = launch(&config_from(
            "--nx 4 --ny 6 --nz 8 --ne 2 --na 3 --nthread_y 2 --nthread_z 2 \
             --ncell_x_per_subblock 2 --ncell_y_per_subblock 1 --ncell_z_per_subblock 2",
        ))
        .unwrap();
        assert!(reference.pass() && tiled.pass());
        assert_eq!(reference.normsq, tiled.normsq);
    }

    #[test]
    fn unknown_flags_abort_parsing() {
        let mut args = Args::parse_str("--nx 3 --frobnicate 1");
        let _ = RunConfig::from_args(&mut args).unwrap();
        assert!(args.finish().is_err());
    }

    #[test]
    fn device_execution_is_rejected_in_this_build() {
        let mut args = Args::parse_str("--is_using_device 1");
        let err = RunConfig::from_args(&mut args).unwrap_err();
        assert!(err.to_string().contains("device"));
    }

    #[test]
    fn overfine_process_grids_are_rejected() {
        let cfg = config_from("--nx 2 --nproc_x 4 --ny 4");
        // Every rank rejects the grid shape before any exchange is posted.
        let err = launch(&cfg).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
