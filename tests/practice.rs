use std::{cell::RefCell, rc::Rc};

use akid::{
    AkidErr,
    blocks::{Block, Processing, ProcessingLayer},
    brain::Brain,
    kid::{Event, Kid, KidSpec, KidState},
    kongfu::{KongFu, LrScheme},
    layers::{Activation, InnerProduct, SoftmaxWithLoss},
    sensors::{FeedSensor, RescaleJoker, Source},
};

const MAX_STEPS: u64 = 900;

fn sensor() -> FeedSensor {
    let source = Source::gaussian_blobs(3, 4, 120, 60, 3).unwrap();
    FeedSensor::new("sensor", source, 12, 20, Some(3)).unwrap()
}

fn brain(decay: Option<f32>) -> Brain {
    let mut brain = Brain::new("brain").unwrap();
    brain
        .attach(ProcessingLayer::new("ip1", InnerProduct::new(8), decay).unwrap())
        .attach(ProcessingLayer::new("relu1", Activation::relu(), None).unwrap())
        .attach(ProcessingLayer::new("ip2", InnerProduct::new(3), decay).unwrap())
        .attach(ProcessingLayer::new("loss", SoftmaxWithLoss::new(), None).unwrap());
    brain
}

fn kid(lr_scheme: LrScheme, max_steps: u64) -> Kid {
    let spec = KidSpec {
        max_steps,
        train_log_step: 100,
        val_log_step: 300,
        seed: Some(11),
    };
    let kongfu = KongFu::momentum(lr_scheme).unwrap();
    let mut kid = Kid::new(sensor(), brain(Some(0.9)), kongfu, spec).unwrap();
    kid.setup().unwrap();
    kid
}

fn staged_rate(step: u64) -> f32 {
    match step {
        0..200 => 0.1,
        200..400 => 0.01,
        400..600 => 0.001,
        _ => 0.0001,
    }
}

#[test]
fn placeholder_rate_follows_the_hook() {
    let mut kid = Kid::new(
        sensor(),
        brain(None),
        KongFu::momentum(LrScheme::Placeholder).unwrap(),
        KidSpec {
            max_steps: MAX_STEPS,
            train_log_step: 100,
            val_log_step: 300,
            seed: Some(11),
        },
    )
    .unwrap();

    let rates = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&rates);
    kid.register(
        Event::BatchBegin,
        Box::new(|kid: &mut Kid| {
            let rate = staged_rate(kid.step());
            kid.kongfu_mut().set_lr_value(rate);
        }),
    );
    kid.register(
        Event::BatchEnd,
        Box::new(move |kid: &mut Kid| seen.borrow_mut().push((kid.step(), kid.lr()))),
    );

    kid.setup().unwrap();
    kid.practice().unwrap();

    assert_eq!(kid.step(), MAX_STEPS);
    assert_eq!(kid.kongfu().lr_value(), Some(0.0001));
    assert_eq!(kid.lr(), Some(0.0001));
    assert_eq!(kid.current_lr().unwrap(), 0.0001);

    let rates = rates.borrow();
    assert_eq!(rates.len(), MAX_STEPS as usize);
    assert_eq!(rates[0], (1, Some(0.1)));
    assert_eq!(rates[199], (200, Some(0.1)));
    assert_eq!(rates[200], (201, Some(0.01)));
}

#[test]
fn exponential_decay_at_the_end_of_practice() {
    let scheme = LrScheme::ExpDecay {
        base_lr: 0.01,
        decay_rate: 0.95,
        num_batches_per_epoch: Some(468),
        decay_epoch_num: 1,
    };
    let mut kid = kid(scheme, MAX_STEPS);
    kid.practice().unwrap();

    assert_eq!(kid.step(), MAX_STEPS);
    assert!((kid.lr().unwrap() - 0.0095).abs() < 1e-6);
    assert!((kid.current_lr().unwrap() - 0.0095).abs() < 1e-6);
    assert_eq!(kid.kongfu().scheduler().scheme().decay_period(), Some(468));
}

#[test]
fn global_step_counts_updates() {
    let mut kid = kid(LrScheme::default(), 37);
    assert_eq!(kid.context().step(), 0);

    kid.practice().unwrap();
    assert_eq!(kid.step(), 37);
    assert_eq!(kid.context().step(), 37);
    assert_eq!(kid.state(), KidState::Stopped);
}

#[test]
fn stop_request_ends_practice_at_that_step() {
    let mut kid = kid(LrScheme::default(), MAX_STEPS);
    let ends = Rc::new(RefCell::new(0));
    let count = Rc::clone(&ends);

    kid.register(
        Event::BatchEnd,
        Box::new(|kid: &mut Kid| {
            if kid.step() == 42 {
                kid.request_stop();
            }
        }),
    );
    kid.register(Event::TrainEnd, Box::new(move |_: &mut Kid| *count.borrow_mut() += 1));

    kid.practice().unwrap();
    assert_eq!(kid.step(), 42);
    assert_eq!(kid.context().step(), 42);
    assert!(kid.stop_requested());
    assert_eq!(*ends.borrow(), 1);
}

#[test]
fn validation_brain_shares_the_training_parameters() {
    let kid = kid(LrScheme::default(), 1);
    let brain = kid.brain();
    let val_brain = kid.val_brain().unwrap();

    assert!(val_brain.is_val());
    assert!(!brain.is_val());
    assert_eq!(val_brain.var_list(), brain.var_list());
    assert_eq!(brain.var_list().len(), 4);
    assert_ne!(val_brain.loss(), brain.loss());
}

#[test]
fn moving_averages_lag_behind_trained_parameters() {
    let mut kid = kid(LrScheme::default(), 50);
    kid.practice().unwrap();

    let graph = &kid.context().graph;
    for param in kid.brain().var_list() {
        let name = graph.variable_name(param);
        let average = graph
            .find_variable(&format!("{name}/ExponentialMovingAverage"))
            .unwrap();
        assert_ne!(graph.variable_value(param), graph.variable_value(average));
    }
}

#[test]
fn practice_reports_precision() {
    let mut kid = kid(LrScheme::default(), 300);
    let precision = kid.practice().unwrap().unwrap();

    assert!((0. ..=1.).contains(&precision));
    assert_eq!(kid.precision(), Some(precision));
}

#[test]
fn brains_train_on_rescaled_data() {
    let mut sensor = sensor();
    sensor
        .attach(RescaleJoker::new("rescale", 0.5, 0.).unwrap(), false)
        .attach(RescaleJoker::new("rescale", 0.5, 0.).unwrap(), true);

    let spec = KidSpec {
        max_steps: 100,
        train_log_step: 50,
        val_log_step: 50,
        seed: Some(11),
    };
    let kongfu = KongFu::momentum(LrScheme::default()).unwrap();
    let mut kid = Kid::new(sensor, brain(None), kongfu, spec).unwrap();
    kid.setup().unwrap();

    let precision = kid.practice().unwrap().unwrap();
    assert!((0. ..=1.).contains(&precision));
    assert_eq!(kid.step(), 100);
}

#[test]
fn blocks_outside_a_kid_follow_the_same_protocol() {
    let mut ctx = akid::Context::seeded(5).unwrap();
    let mut sensor = sensor();
    sensor.setup(&mut ctx, &[]).unwrap();

    let x = sensor.data().unwrap();
    assert!(matches!(Brain::new(""), Err(AkidErr::MissingName)));

    let mut layer = ProcessingLayer::new("ip", InnerProduct::new(2), None).unwrap();
    layer.setup(&mut ctx, &[x]).unwrap();
    let first = layer.var_list();
    layer.setup(&mut ctx, &[x]).unwrap();
    assert_eq!(layer.var_list(), first);
}
