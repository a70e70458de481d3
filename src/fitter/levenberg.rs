//! Levenberg–Marquardt iteration.
//!
//! Each iteration tries damped steps `(AᵀA + λI) x = −Aᵀr` on the whitened,
//! normalised problem. A step is accepted only if the χ² actually evaluated
//! through the full delay chain decreases; then `λ` is divided by
//! `lambda_down`. Otherwise `λ` is multiplied by `lambda_up` and the step is
//! retried. Trial points that cannot be evaluated (parameter out of range,
//! binary fixed point failing, ambiguous pulse numbers) count as rejections.
//!
//! When `λ` exceeds `lambda_max` no downhill step was found around the current
//! point. It is the converged minimum only if the undamped linear model agrees,
//! i.e. predicts no χ² decrease beyond the tolerances; otherwise the fit stops
//! with [`PulsefitError::FitNotConverged`] at the current point.

use tracing::{debug, info, warn};

use crate::fitter::{FitState, Fitter};
use crate::model::TimingModel;
use crate::pulsefit_errors::PulsefitError;

pub(crate) fn fit(fitter: &Fitter<'_>, model: &mut TimingModel, names: &[String]) -> Result<FitState, PulsefitError> {
    let params = fitter.params();
    let n = names.len();
    let mut lambda = params.lambda_initial;
    let mut lin = fitter.linearize(model, names)?;

    for iteration in 1..=params.max_iterations {
        let chi2 = lin.problem.chi2();
        let sigmas = fitter.state(model, names, &lin, iteration - 1, false)?.uncertainties();

        let accepted = loop {
            if lambda > params.lambda_max {
                break None;
            }
            let delta = lin.problem.step(lambda);
            let delta = &delta.as_slice()[..n];

            let mut trial = model.clone();
            let evaluated = trial
                .apply_update(names, delta, &sigmas)
                .and_then(|_| fitter.evaluate(&trial))
                .and_then(|(delays, residuals)| {
                    let trial_chi2 = fitter.chi2_of(&residuals)?;
                    Ok((delays, residuals, trial_chi2))
                });
            match evaluated {
                Ok((delays, residuals, trial_chi2)) if trial_chi2 < chi2 => {
                    debug!(lambda, trial_chi2, "accepted damped step");
                    break Some((trial, delays, residuals, fitter.step_converged(delta, &sigmas)));
                }
                Ok((_, _, trial_chi2)) => {
                    debug!(lambda, trial_chi2, "rejected damped step");
                }
                Err(error) => {
                    debug!(lambda, %error, "trial point could not be evaluated");
                }
            }
            lambda *= params.lambda_up;
        };

        let Some((trial, delays, residuals, step_small)) = accepted else {
            let predicted = lin.problem.predicted_chi2(&lin.problem.step(0.0));
            let at_minimum = fitter.chi2_converged(chi2, predicted);
            model.apply_update(names, &vec![0.0; n], &sigmas)?;
            let state = fitter.state(model, names, &lin, iteration - 1, at_minimum)?;
            if at_minimum {
                info!(iteration, chi2, lambda, "no downhill step left, stopping");
                return Ok(state);
            }
            warn!(iteration, chi2, predicted, lambda, "no downhill step accepted");
            return Err(PulsefitError::FitNotConverged {
                iterations: iteration - 1,
                chi2: state.chi2,
                best: Box::new(state),
            });
        };

        *model = trial;
        lambda = (lambda / params.lambda_down).max(f64::MIN_POSITIVE);
        lin = fitter.linearize_at(model, &delays, residuals, names)?;
        let new_chi2 = lin.problem.chi2();
        info!(iteration, chi2 = new_chi2, lambda, "Levenberg-Marquardt iteration");

        if step_small || fitter.chi2_converged(chi2, new_chi2) {
            let state = fitter.state(model, names, &lin, iteration, true)?;
            model.apply_update(names, &vec![0.0; n], &state.uncertainties())?;
            return Ok(state);
        }
    }

    // Accepted steps only lower chi2: the current point is the best one
    let state = fitter.state(model, names, &lin, params.max_iterations, false)?;
    model.apply_update(names, &vec![0.0; n], &state.uncertainties())?;
    warn!(
        iterations = params.max_iterations,
        chi2 = state.chi2,
        "Levenberg-Marquardt fit did not converge"
    );
    Err(PulsefitError::FitNotConverged {
        iterations: params.max_iterations,
        chi2: state.chi2,
        best: Box::new(state),
    })
}
