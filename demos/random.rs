use ctembed::{Activation, Architecture, Configuration, Embedder, IndexStrategy, Metric, Model};
use ndarray::{Array, Array2};

// In this example, we generate 2000 random points in a 20-dimensional Euclidean space and fit a
// two-dimensional embedding. The neighbour lists are computed with a cover tree, since the
// dataset is at the default threshold of the automatic strategy.
fn fit() -> Model {
    let mut rng = oorandom::Rand64::new(0);
    let data = Array::from_shape_simple_fn((2000, 20), || rng.rand_float());

    let config = Configuration::builder()
        .k(15)
        .metric(Metric::Euclidean)
        .index(IndexStrategy::Auto { exact_below: 2000 })
        .epochs(50)
        .seed(1234)
        .build()
        .unwrap();

    let mut embedder = Embedder::new(config);
    let summary = embedder.fit(data.view()).unwrap();
    println!(
        "> Stopped after {} epochs ({:?}), best loss {:.4}",
        summary.loss_history.len(),
        summary.stop_reason,
        summary.best_loss
    );

    // The trained network embeds points it has never seen.
    let queries = Array2::from_shape_simple_fn((10, 20), || rng.rand_float());
    let embedded = embedder.transform(queries.view()).unwrap();
    println!("> Out-of-sample embedding: {} x {}", embedded.nrows(), embedded.ncols());

    embedder.into_model().unwrap()
}

// A fitted model can be stored, reloaded and trained further on new data.
fn persist_and_resume(model: Model) {
    let path = std::env::temp_dir().join("ctembed-random.json");
    model.save(&path).unwrap();

    let mut embedder = Embedder::from_model(Model::load(&path).unwrap());

    let mut rng = oorandom::Rand64::new(1);
    let more = Array::from_shape_simple_fn((500, 20), || rng.rand_float());
    let summary = embedder.resume(more.view()).unwrap();
    println!("> Resumed for {} epochs", summary.loss_history.len());

    std::fs::remove_file(&path).unwrap();
}

// Any hidden layout works; this one is shallow enough to train in a blink.
fn custom() {
    let mut rng = oorandom::Rand64::new(2);
    let data = Array::from_shape_simple_fn((300, 8), || rng.rand_float());

    let config = Configuration::builder()
        .architecture(Architecture::Custom {
            hidden: vec![32],
            activation: Activation::Tanh,
        })
        .k(10)
        .embedding_dims(3)
        .epochs(20)
        .build()
        .unwrap();

    let embedding = Embedder::new(config).fit_transform(data.view()).unwrap();
    println!("> Custom network embedding: {} x {}", embedding.nrows(), embedding.ncols());
}

fn main() {
    let model = fit();
    persist_and_resume(model);
    custom();
}
