use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::time::Instant;

use clap::{App, Arg};
use ctembed::{Configuration, Embedder, Loss, Metric, Model};
use ndarray::Array2;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn parse_metric(name: &str) -> Metric {
    match name {
        "manhattan" => Metric::Manhattan,
        "chebyshev" => Metric::Chebyshev,
        "angular" => Metric::Angular,
        _ => Metric::Euclidean,
    }
}

fn parse_loss(name: &str) -> Loss {
    match name {
        "margin" => Loss::Margin,
        "softmax-ratio" => Loss::SoftmaxRatio,
        "softmax-ratio-pn" => Loss::SoftmaxRatioPn,
        _ => Loss::PnMargin,
    }
}

fn read_csv(path: &str, skip_header: bool) -> Result<Array2<f64>, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = 0;
    let mut cols = None;
    let mut values = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if (skip_header && n == 0) || line.trim().is_empty() {
            continue;
        }

        let before = values.len();
        for field in line.split(',') {
            values.push(field.trim().parse::<f64>()?);
        }

        let width = values.len() - before;
        match cols {
            None => cols = Some(width),
            Some(c) if c != width => {
                return Err(format!("line {} has {} fields, expected {}", n + 1, width, c).into())
            }
            _ => {}
        }
        rows += 1;
    }

    Ok(Array2::from_shape_vec((rows, cols.unwrap_or(0)), values)?)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("embed_csv")
        .about("Embeds the rows of a CSV file with a triplet-trained network")
        .arg(Arg::with_name("input").help("CSV file, one point per row").required(true))
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("Where to write the embedding (stdout if omitted)"),
        )
        .arg(Arg::with_name("header").long("header").help("Skip the first line"))
        .arg(Arg::with_name("k").short("k").takes_value(true).default_value("15"))
        .arg(Arg::with_name("dims").short("d").long("dims").takes_value(true).default_value("2"))
        .arg(Arg::with_name("epochs").long("epochs").takes_value(true).default_value("1000"))
        .arg(Arg::with_name("seed").long("seed").takes_value(true))
        .arg(
            Arg::with_name("metric")
                .long("metric")
                .takes_value(true)
                .possible_values(&["euclidean", "manhattan", "chebyshev", "angular"])
                .default_value("euclidean"),
        )
        .arg(
            Arg::with_name("loss")
                .long("loss")
                .takes_value(true)
                .possible_values(&["pn-margin", "margin", "softmax-ratio", "softmax-ratio-pn"])
                .default_value("pn-margin"),
        )
        .arg(
            Arg::with_name("save")
                .long("save")
                .takes_value(true)
                .help("Save the trained model as JSON"),
        )
        .arg(
            Arg::with_name("model")
                .long("model")
                .takes_value(true)
                .help("Embed with a saved model instead of training"),
        )
        .get_matches();

    let input = matches.value_of("input").unwrap_or_default();
    let data = read_csv(input, matches.is_present("header"))?;
    info!(rows = data.nrows(), cols = data.ncols(), input, "data loaded");

    let start = Instant::now();
    let embedding = match matches.value_of("model") {
        Some(path) => Model::load(path)?.transform(data.view())?,
        None => {
            let mut builder = Configuration::builder()
                .k(matches.value_of("k").unwrap_or("15").parse()?)
                .embedding_dims(matches.value_of("dims").unwrap_or("2").parse()?)
                .epochs(matches.value_of("epochs").unwrap_or("1000").parse()?)
                .metric(parse_metric(matches.value_of("metric").unwrap_or_default()))
                .loss(parse_loss(matches.value_of("loss").unwrap_or_default()));
            if let Some(seed) = matches.value_of("seed") {
                builder = builder.seed(seed.parse()?);
            }

            let mut embedder = Embedder::new(builder.build()?);
            let embedding = embedder.fit_transform(data.view())?;
            if let (Some(path), Some(model)) = (matches.value_of("save"), embedder.model()) {
                model.save(path)?;
            }
            embedding
        }
    };
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "embedding ready");

    let mut out: Box<dyn Write> = match matches.value_of("output") {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    for row in embedding.outer_iter() {
        let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}", fields.join(","))?;
    }
    out.flush()?;

    Ok(())
}

fn main() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}
