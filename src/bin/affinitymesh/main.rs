#[macro_use]
extern crate clap;

use std::fmt::{Debug, Display};
use std::path::Path;
use std::process::exit;
use std::str::FromStr;

use num_traits::Float;

use affinitymesh::{AffinityPropagation, ApConfig, NegEuclidean, Preference};

use crate::ops::{display_results, from_file, from_sparse_file};

mod ops;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let matches = clap_app!(affinitymesh =>
        (version: "0.1.0")
        (about: "Message-driven distributed Affinity Propagation")
        (@arg INPUT: -i --input +takes_value +required "Path to input file")
        (@arg PRECALCULATED: -x --precalculated "Input file is a precalculated similarity matrix")
        (@arg SPARSE: -z --sparse "Input file is a sparse 'i j s' edge list; absent pairs never exchange messages")
        (@arg DELIMITER: -l --delimiter +takes_value "Column delimiter, default=tab")
        (@arg PREF: -p --preference +takes_value +allow_hyphen_values "Non-positive preference, default=median pairwise similarity")
        (@arg DAMPING: -d --damping +takes_value "Damping value in range [0, 1), default=0.5")
        (@arg SHARDS: -s --shards +takes_value "Number of graph shards, default=4")
        (@arg THREADS: -t --threads +takes_value "Number of worker threads, default=4")
        (@arg SEND_EACH: -e --send_each +takes_value "Report cadence in iterations, default=1")
        (@arg CONV_ITER: -c --convergence_iter +takes_value "Iterations the exemplar set must hold, default=10")
        (@arg MAX_ITER: -m --max_iter +takes_value "Maximum iterations, default=1000")
        (@arg PRECISION: -r --precision +takes_value "Set f32 or f64 precision, default=f32")
    )
    .get_matches();

    let input_file = matches.value_of("INPUT").unwrap().to_string();
    if !Path::new(&input_file).exists() {
        eprintln!("Unable to locate input file {}", input_file);
        exit(1);
    }
    let precalculated = matches.is_present("PRECALCULATED");
    let sparse = matches.is_present("SPARSE");
    if precalculated && sparse {
        eprintln!("--precalculated and --sparse are mutually exclusive");
        exit(2);
    }
    let delimiter = matches.value_of("DELIMITER").unwrap_or("\t").to_string();
    let damping = parse_arg::<f64>(&matches, "DAMPING", "0.5", "damping");
    let shards = parse_arg::<usize>(&matches, "SHARDS", "4", "shards");
    let threads = parse_arg::<usize>(&matches, "THREADS", "4", "threads");
    let send_each = parse_arg::<u64>(&matches, "SEND_EACH", "1", "send_each");
    let convergence_iter = parse_arg::<u64>(&matches, "CONV_ITER", "10", "convergence_iter");
    let max_iterations = parse_arg::<u64>(&matches, "MAX_ITER", "1000", "max_iter");
    let precision = matches.value_of("PRECISION").unwrap_or("f32");
    let preference = match matches.value_of("PREF") {
        Some(p) => {
            let p = p.parse::<f64>().unwrap_or_else(|_| {
                eprintln!("Unable to parse preference");
                exit(1);
            });
            if p > 0. {
                eprintln!("Preference must be non-positive");
                exit(2);
            }
            Some(p)
        }
        None => None,
    };
    if damping < 0. || damping >= 1. {
        eprintln!("Improper parameter set!");
        exit(2);
    }
    if shards < 1 || threads < 1 || send_each < 1 || max_iterations < 1 {
        eprintln!("Improper parameter set!");
        exit(2);
    }

    match precision {
        "f64" => run::<f64>(
            &input_file,
            &delimiter,
            precalculated,
            sparse,
            preference,
            damping,
            shards,
            threads,
            send_each,
            convergence_iter,
            max_iterations,
        ),
        _ => run::<f32>(
            &input_file,
            &delimiter,
            precalculated,
            sparse,
            preference,
            damping,
            shards,
            threads,
            send_each,
            convergence_iter,
            max_iterations,
        ),
    };
}

fn parse_arg<T: FromStr>(
    matches: &clap::ArgMatches,
    key: &str,
    default: &str,
    name: &str,
) -> T {
    matches
        .value_of(key)
        .unwrap_or(default)
        .parse::<T>()
        .unwrap_or_else(|_| {
            eprintln!("Unable to parse {}", name);
            exit(1);
        })
}

fn run<F>(
    input_file: &str,
    delimiter: &str,
    precalculated: bool,
    sparse: bool,
    preference: Option<f64>,
    damping: f64,
    shards: usize,
    threads: usize,
    send_each: u64,
    convergence_iter: u64,
    max_iterations: u64,
) where
    F: Float + Send + Sync + Default + FromStr + Display + 'static,
    <F as FromStr>::Err: Debug,
{
    let config = ApConfig::<F> {
        damping: F::from(damping).unwrap(),
        preference: match preference {
            Some(p) => Preference::Value(F::from(p).unwrap()),
            None => Preference::Median,
        },
        shards,
        threads,
        send_each,
        enough_iterations: convergence_iter,
        max_iterations,
        ..ApConfig::default()
    };
    let ap = AffinityPropagation::new(config).unwrap_or_else(|e| {
        eprintln!("{}", e);
        exit(2);
    });

    let path = Path::new(input_file).to_path_buf();
    let result = if sparse {
        let (mut s, labels) = from_sparse_file::<F>(path).unwrap_or_else(|e| {
            eprintln!("{}", e.message);
            exit(1);
        });
        // Sparse input carries no self-similarities; the preference fills
        // the diagonal before the run.
        if let Err(e) = ap.config().preference.apply(&mut s) {
            eprintln!("{}", e);
            exit(2);
        }
        ap.predict_precomputed(s).map(|r| (r, labels))
    } else if precalculated {
        let (mut s, labels) = from_file::<F>(path, delimiter, true).unwrap_or_else(|e| {
            eprintln!("{}", e.message);
            exit(1);
        });
        if preference.is_some() {
            if let Err(e) = ap.config().preference.apply(&mut s) {
                eprintln!("{}", e);
                exit(2);
            }
        }
        ap.predict_precomputed(s).map(|r| (r, labels))
    } else {
        let (x, labels) = from_file::<F>(path, delimiter, false).unwrap_or_else(|e| {
            eprintln!("{}", e.message);
            exit(1);
        });
        ap.predict(&x, NegEuclidean::default()).map(|r| (r, labels))
    };

    match result {
        Ok((result, labels)) => {
            display_results(result.converged, &result.clusters, &labels);
        }
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    }
}
