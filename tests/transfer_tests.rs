use tch::nn::Module;
use tch::Tensor;
use tch_style::vision::image;
use tch_style::vision::vgg::{Backbone, Pooling, Vgg};
use tch_style::{Error, InitMode, StyleConfig, StyleLayer, StyleTransfer};

use test_utils::*;

fn small_config() -> StyleConfig {
    StyleConfig {
        content_layer: "conv3_1".to_string(),
        style_layers: vec![
            StyleLayer::new("conv1_1", 1.0),
            StyleLayer::new("conv2_1", 0.5),
            StyleLayer::new("conv3_1", 0.25),
        ],
        learning_rate: 1e-2,
        steps: 10,
        checkpoint_every: Some(5),
        ..Default::default()
    }
}

fn images() -> (Tensor, Tensor) {
    tch::manual_seed(0);
    let content = Tensor::rand([1, 3, 16, 16], tch::kind::FLOAT_CPU);
    let style = Tensor::rand([1, 3, 16, 16], tch::kind::FLOAT_CPU);
    (content, style)
}

fn net() -> Vgg {
    random_vgg(Backbone::Vgg16, Pooling::Avg)
}

#[test]
fn content_init() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let transfer = StyleTransfer::new(&net, &content, &style, small_config()).unwrap();
    assert_eq!(transfer.steps_done(), 0);
    assert!(max_abs_diff(&transfer.image().unwrap(), &content) < 1e-5);

    let losses = transfer.evaluate().unwrap();
    assert!(losses.content < 1e-10, "{losses}");
    assert!(losses.style > 0.0, "{losses}");
    assert!(losses.tv > 0.0, "{losses}");
    let config = transfer.config();
    let expected = losses.content * config.content_weight
        + losses.style * config.style_weight
        + losses.tv * config.tv_weight;
    assert!((losses.total - expected).abs() <= 1e-4 * expected.abs(), "{losses}");
}

#[test]
fn blank_and_noise_init() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let config = StyleConfig { init: InitMode::Blank, ..small_config() };
    let transfer = StyleTransfer::new(&net, &content, &style, config).unwrap();
    let mean = Tensor::from_slice(&image::IMAGENET_MEAN).view([1, 3, 1, 1]);
    assert!(max_abs_diff(&transfer.image().unwrap(), &mean.expand([1, 3, 16, 16], false)) < 1e-6);
    assert_eq!(transfer.evaluate().unwrap().tv, 0.0);

    let config = StyleConfig { init: InitMode::Noise, seed: 7, ..small_config() };
    let t1 = StyleTransfer::new(&net, &content, &style, config.clone()).unwrap();
    let t2 = StyleTransfer::new(&net, &content, &style, config).unwrap();
    assert_eq!(max_abs_diff(t1.target(), t2.target()), 0.0);
    assert!(t1.evaluate().unwrap().content > 0.0);
    let config = StyleConfig { init: InitMode::Noise, seed: 8, ..small_config() };
    let t3 = StyleTransfer::new(&net, &content, &style, config).unwrap();
    assert!(max_abs_diff(t1.target(), t3.target()) > 0.0);
}

#[test]
fn invalid_setups() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let config = StyleConfig { content_layer: "conv3_4".to_string(), ..small_config() };
    assert!(matches!(
        StyleTransfer::new(&net, &content, &style, config),
        Err(Error::UnknownLayer { .. })
    ));

    let mut config = small_config();
    config.style_layers.push(StyleLayer::new("conv9_1", 1.0));
    assert!(matches!(
        StyleTransfer::new(&net, &content, &style, config),
        Err(Error::UnknownLayer { .. })
    ));

    let config = StyleConfig { steps: 0, ..small_config() };
    assert!(matches!(
        StyleTransfer::new(&net, &content, &style, config),
        Err(Error::Config(_))
    ));

    let small_style = Tensor::rand([1, 3, 8, 8], tch::kind::FLOAT_CPU);
    assert!(matches!(
        StyleTransfer::new(&net, &content, &small_style, small_config()),
        Err(Error::Shape(_))
    ));
}

#[test]
fn only_the_image_is_trained() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let probe = Tensor::rand([1, 3, 16, 16], tch::kind::FLOAT_CPU);
    let before = net.forward(&probe);

    let mut transfer = StyleTransfer::new(&net, &content, &style, small_config()).unwrap();
    let variables = transfer.var_store().trainable_variables();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].size(), [1, 3, 16, 16]);

    let initial = transfer.target().copy();
    transfer.step().unwrap();
    transfer.step().unwrap();
    assert_eq!(transfer.steps_done(), 2);
    assert!(max_abs_diff(transfer.target(), &initial) > 0.0);
    assert_eq!(max_abs_diff(&net.forward(&probe), &before), 0.0);
    assert!(!transfer.content_target().requires_grad());
    assert_eq!(transfer.style_grams().len(), 3);
    assert!(transfer.style_grams().iter().all(|g| !g.requires_grad()));
    assert!(transfer.target().requires_grad());
}

#[test]
fn loss_decreases() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    // The content term starts at zero with a content init, leave it out so
    // that the total is expected to go down.
    let config = StyleConfig { steps: 30, content_weight: 0., ..small_config() };
    let mut transfer = StyleTransfer::new(&net, &content, &style, config).unwrap();
    let history = transfer.run(|_, _, _| Ok(())).unwrap();
    assert_eq!(history.len(), 30);
    let first = history[0].total;
    let last = transfer.evaluate().unwrap().total;
    assert!(last < first, "{first} {last}");
    assert!(history.iter().all(|l| l.total.is_finite()));

    let img = transfer.image().unwrap();
    assert_eq!(img.size(), [1, 3, 16, 16]);
    assert!(f64_from(&img.min()) >= 0.0);
    assert!(f64_from(&img.max()) <= 1.0);
}

#[test]
fn run_callback() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let mut transfer = StyleTransfer::new(&net, &content, &style, small_config()).unwrap();
    let mut seen = vec![];
    let history = transfer
        .run(|step_idx, losses, transfer| {
            assert_eq!(step_idx, transfer.steps_done());
            seen.push((step_idx, losses.total));
            Ok(())
        })
        .unwrap();
    let steps: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(steps, (1..=10).collect::<Vec<_>>());
    let totals: Vec<_> = seen.iter().map(|(_, l)| *l).collect();
    assert_eq!(totals, history.iter().map(|l| l.total).collect::<Vec<_>>());

    // The budget is spent, running again does nothing.
    assert!(transfer.run(|_, _, _| Ok(())).unwrap().is_empty());
}

#[test]
fn callback_errors_stop_the_run() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let mut transfer = StyleTransfer::new(&net, &content, &style, small_config()).unwrap();
    let result = transfer.run(|step_idx, _, _| {
        if step_idx == 3 {
            Err(Error::Config("stop".to_string()))
        } else {
            Ok(())
        }
    });
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(transfer.steps_done(), 3);

    // Resuming finishes the remaining steps.
    let history = transfer.run(|_, _, _| Ok(())).unwrap();
    assert_eq!(history.len(), 7);
}

#[test]
fn checkpoint_images() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    let mut transfer = StyleTransfer::new(&net, &content, &style, small_config()).unwrap();
    let every = transfer.config().checkpoint_every.unwrap();
    let mut saved = vec![];
    transfer
        .run(|step_idx, _, transfer| {
            if step_idx % every == 0 {
                let filename = temp_path(&format!("step-{step_idx}.png"));
                image::save(&transfer.image()?, &filename)?;
                saved.push(filename);
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(saved.len(), 2);
    for filename in saved {
        let img = image::load(&filename, None).unwrap();
        assert_eq!(img.size(), [1, 3, 16, 16]);
        std::fs::remove_file(filename).unwrap();
    }
}

#[test]
fn divergence_stops_before_the_update() {
    let _rng = rng_lock();
    let net = net();
    let (content, style) = images();
    // Finite as a config value but overflows the float loss.
    let config = StyleConfig { style_weight: 1e300, ..small_config() };
    let mut transfer = StyleTransfer::new(&net, &content, &style, config).unwrap();
    let initial = transfer.target().copy();
    assert!(matches!(transfer.step(), Err(Error::Diverged { step: 1 })));
    assert_eq!(transfer.steps_done(), 0);
    assert_eq!(max_abs_diff(transfer.target(), &initial), 0.0);

    assert!(matches!(transfer.run(|_, _, _| Ok(())), Err(Error::Diverged { step: 1 })));
    assert_eq!(transfer.steps_done(), 0);
}
