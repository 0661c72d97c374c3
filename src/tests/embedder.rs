use std::ops::ControlFlow;

use ndarray::{array, Array1, Array2, ArrayView2};

use super::{blobs, quick_config, random_points};
use crate::{
    CancellationToken, Configuration, Dataset, Embedder, EpochReport, Error, Metric, Model,
    StopReason, DEFAULT_SEED,
};

fn sq_dist(e: ArrayView2<'_, f64>, i: usize, j: usize) -> f64 {
    (&e.row(i) - &e.row(j)).mapv(|v| v * v).sum()
}

#[test]
fn test_two_pairs_stay_apart() {
    let data = array![[0., 0.], [0.1, 0.], [10., 10.], [10.1, 10.]];
    let config = quick_config()
        .k(1)
        .epochs(100)
        .n_epochs_without_progress(100)
        .build()
        .unwrap();

    let mut embedder = Embedder::new(config);
    let embedding = embedder.fit_transform(data.view()).unwrap();
    assert_eq!((4, 2), embedding.dim());

    let within = sq_dist(embedding.view(), 0, 1).max(sq_dist(embedding.view(), 2, 3));
    for &(i, j) in &[(0, 2), (0, 3), (1, 2), (1, 3)] {
        assert!(within < sq_dist(embedding.view(), i, j));
    }
}

#[test]
fn test_blobs_keep_their_neighbours() {
    let data = blobs(&[[0., 0., 0.], [20., 0., 0.], [0., 20., 0.]], 20, 2., 61);
    let config = quick_config().epochs(40).build().unwrap();

    let mut embedder = Embedder::new(config);
    let summary = embedder.fit(data.view()).unwrap();
    assert!(!summary.loss_history.is_empty());

    let embedding = embedder.transform(data.view()).unwrap();
    let mut agree = 0;
    for i in 0..data.nrows() {
        let nearest = (0..data.nrows())
            .filter(|&j| j != i)
            .min_by(|&a, &b| {
                sq_dist(embedding.view(), i, a)
                    .partial_cmp(&sq_dist(embedding.view(), i, b))
                    .unwrap()
            })
            .unwrap();
        if nearest / 20 == i / 20 {
            agree += 1;
        }
    }
    assert!(agree >= 54, "only {} of 60 nearest neighbours share a blob", agree);
}

#[test]
fn test_transform_before_fit() {
    let embedder = Embedder::default();
    assert!(!embedder.is_trained());
    assert!(matches!(
        embedder.transform(random_points(3, 2, 62).view()).unwrap_err(),
        Error::NotTrained
    ));

    let mut embedder = Embedder::new(quick_config().build().unwrap());
    assert!(matches!(
        embedder.resume(random_points(10, 2, 63).view()).unwrap_err(),
        Error::NotTrained
    ));
}

#[test]
fn test_too_few_points() {
    let mut embedder = Embedder::new(quick_config().build().unwrap());

    let err = embedder.fit(random_points(5, 3, 64).view()).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { points: 5, k: 5 }));

    let err = embedder.fit(random_points(1, 3, 65).view()).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { points: 1, k: 5 }));

    // The configured k is reported even when there is nothing to fit.
    let err = embedder.fit(Array2::<f64>::zeros((0, 3)).view()).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { points: 0, k: 5 }));
    assert!(!embedder.is_trained());

    // Without a neighbourhood request the dataset itself reports k = 0.
    let err = Dataset::new(Array2::zeros((0, 3))).unwrap_err();
    assert!(matches!(err, Error::InsufficientData { points: 0, k: 0 }));
}

#[test]
fn test_non_finite_input() {
    let mut data = random_points(20, 3, 66);
    data[[7, 2]] = f64::NAN;

    let mut embedder = Embedder::new(quick_config().build().unwrap());
    let err = embedder.fit(data.view()).unwrap_err();
    assert!(matches!(err, Error::NonFiniteInput { row: 7, column: 2 }));
}

#[test]
fn test_same_seed_same_embedding() {
    let data = random_points(50, 4, 67);
    let config = quick_config().epochs(5).build().unwrap();

    let first = Embedder::new(config.clone()).fit_transform(data.view()).unwrap();
    let second = Embedder::new(config.clone()).fit_transform(data.view()).unwrap();
    assert_eq!(first, second);

    let mut reseeded = config;
    reseeded.seed = Some(43);
    let third = Embedder::new(reseeded).fit_transform(data.view()).unwrap();
    assert_ne!(first, third);
}

#[test]
fn test_transform_is_pure() {
    let data = random_points(40, 3, 68);
    let mut embedder = Embedder::new(quick_config().epochs(3).build().unwrap());
    let fitted = embedder.fit_transform(data.view()).unwrap();

    assert_eq!(fitted, embedder.transform(data.view()).unwrap());
    assert_eq!(fitted, embedder.transform(data.view()).unwrap());

    let unseen = random_points(7, 3, 69);
    let embedded = embedder.transform(unseen.view()).unwrap();
    assert_eq!((7, 2), embedded.dim());

    let err = embedder.transform(random_points(2, 4, 70).view()).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidDimension {
            expected: 3,
            found: 4,
            ..
        }
    ));
}

#[test]
fn test_model_persistence() {
    let data = random_points(40, 3, 71);
    let mut embedder = Embedder::new(quick_config().epochs(3).embedding_dims(3).build().unwrap());
    let expected = embedder.fit_transform(data.view()).unwrap();
    let model = embedder.into_model().unwrap();

    let mut buffer = Vec::new();
    model.to_writer(&mut buffer).unwrap();
    let decoded = Model::from_reader(buffer.as_slice()).unwrap();
    assert_eq!(model, decoded);
    assert_eq!(expected, decoded.transform(data.view()).unwrap());

    let path = std::env::temp_dir().join(format!("ctembed-model-{}.json", std::process::id()));
    model.save(&path).unwrap();
    let loaded = Model::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let restored = Embedder::from_model(loaded);
    assert!(restored.is_trained());
    assert_eq!(model.config(), restored.config());
    assert_eq!(expected, restored.transform(data.view()).unwrap());

    assert!(matches!(
        Model::from_reader(&b"{\"config\": 1}"[..]).unwrap_err(),
        Error::Serialization(_)
    ));
    assert!(matches!(
        Model::load(std::env::temp_dir().join("ctembed-missing-model.json")).unwrap_err(),
        Error::Io(_)
    ));
}

#[test]
fn test_inconsistent_model_is_rejected_on_load() {
    let data = random_points(20, 3, 75);
    let mut embedder = Embedder::new(quick_config().epochs(1).build().unwrap());
    embedder.fit(data.view()).unwrap();
    let model = serde_json::to_value(embedder.model().unwrap()).unwrap();

    let reload = |value: &serde_json::Value| Model::from_reader(serde_json::to_vec(value).unwrap().as_slice());
    assert!(reload(&model).is_ok());

    // Layers are 3 -> 16 -> 16 -> 2.
    let mut wrong_width = model.clone();
    wrong_width["config"]["embedding_dims"] = 5.into();
    assert!(matches!(
        reload(&wrong_width).unwrap_err(),
        Error::InvalidDimension {
            row: 2,
            expected: 5,
            found: 2
        }
    ));

    let mut short_bias = model.clone();
    short_bias["network"]["params"]["layers"][0]["bias"] = serde_json::to_value(Array1::<f64>::zeros(7)).unwrap();
    assert!(matches!(
        reload(&short_bias).unwrap_err(),
        Error::InvalidDimension {
            row: 0,
            expected: 16,
            found: 7
        }
    ));

    let mut broken_chain = model.clone();
    broken_chain["network"]["params"]["layers"][1]["weights"] =
        serde_json::to_value(Array2::<f64>::zeros((12, 16))).unwrap();
    assert!(matches!(
        reload(&broken_chain).unwrap_err(),
        Error::InvalidDimension {
            row: 1,
            expected: 16,
            found: 12
        }
    ));

    let mut no_layers = model;
    no_layers["network"]["params"]["layers"] = serde_json::Value::Array(Vec::new());
    assert!(matches!(
        reload(&no_layers).unwrap_err(),
        Error::InvalidDimension { found: 0, .. }
    ));
}

#[test]
fn test_resume_continues_from_model() {
    let data = random_points(40, 3, 72);
    let mut embedder = Embedder::new(quick_config().epochs(3).build().unwrap());
    let first = embedder.fit(data.view()).unwrap();
    let before = embedder.model().unwrap().clone();

    let second = embedder.resume(data.view()).unwrap();
    assert_eq!(3, first.loss_history.len());
    assert!(!second.loss_history.is_empty());
    assert!(second.best_loss.is_finite());
    assert_eq!(before.network().input_dim(), embedder.model().unwrap().network().input_dim());

    let err = embedder.resume(random_points(40, 5, 73).view()).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidDimension {
            expected: 3,
            found: 5,
            ..
        }
    ));
}

#[test]
fn test_observed_and_cancelled_fits() {
    let data = random_points(30, 3, 74);
    let mut embedder = Embedder::new(quick_config().epochs(4).build().unwrap());

    let mut epochs = 0;
    let mut observer = |_: &EpochReport| -> ControlFlow<()> {
        epochs += 1;
        ControlFlow::Continue(())
    };
    let summary = embedder.fit_observed(data.view(), &mut observer).unwrap();
    assert_eq!(4, epochs);
    assert_eq!(4, summary.loss_history.len());
    assert_eq!(StopReason::MaxEpochs, summary.stop_reason);

    let token = CancellationToken::new();
    let mut embedder = Embedder::new(quick_config().build().unwrap()).with_cancellation(token.clone());
    token.cancel();
    let summary = embedder.fit(data.view()).unwrap();
    assert_eq!(StopReason::Cancelled, summary.stop_reason);
    assert!(summary.loss_history.is_empty());
    assert!(embedder.is_trained());
}

#[test]
fn test_configuration() {
    let config = Configuration::default();
    assert_eq!(2, config.embedding_dims);
    assert_eq!(150, config.k);
    assert_eq!(Metric::Euclidean, config.metric);
    assert_eq!(DEFAULT_SEED, config.effective_seed());
    assert!(config.validate().is_ok());

    for builder in vec![
        Configuration::builder().k(0),
        Configuration::builder().embedding_dims(0),
        Configuration::builder().learning_rate(-1.),
        Configuration::builder().margin(f64::NAN),
        Configuration::builder().tree_base(1.),
    ] {
        assert!(matches!(builder.build().unwrap_err(), Error::InvalidConfiguration(_)));
    }

    let config = Configuration::builder()
        .metric(Metric::Angular)
        .seed(3)
        .build()
        .unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let decoded: Configuration = serde_json::from_str(&json).unwrap();
    assert_eq!(config, decoded);
    assert_eq!(3, decoded.effective_seed());
}
