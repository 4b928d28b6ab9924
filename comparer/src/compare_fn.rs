use training::report::{Tensor, Value};

/// The default relative tolerance.
pub const DEFAULT_RTOL: f64 = 1.3e-6;
/// The default absolute tolerance.
pub const DEFAULT_ATOL: f64 = 1e-5;

/// Compares the same value coming from two engines.
///
/// Called with the names of both engines, the key of the value and both
/// values. An `Err` describes the mismatch.
pub type CompareFn =
    Box<dyn Fn(&str, &str, &str, &Value, &Value) -> Result<(), String> + Send + Sync>;

/// Returns a compare function that checks values are close within the given tolerances.
///
/// # Arguments
/// * `rtol` - The tolerance relative to the value of the second engine.
/// * `atol` - The absolute tolerance.
pub fn get_default_comparer(
    rtol: f64,
    atol: f64,
) -> impl Fn(&str, &str, &str, &Value, &Value) -> Result<(), String> + Send + Sync + 'static {
    move |engine_a, engine_b, key, a, b| {
        assert_allclose(a, b, rtol, atol)
            .map_err(|e| format!("{key} of {engine_a} and {engine_b} are not close: {e}"))
    }
}

/// Checks that `|a - b| <= atol + rtol * |b|` holds element wise.
///
/// Tensors are moved to the cpu before comparing, integers must be equal.
pub fn assert_allclose(a: &Value, b: &Value, rtol: f64, atol: f64) -> Result<(), String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) if x == y => Ok(()),
        (Value::Int(x), Value::Int(y)) => Err(format!("{x} != {y}")),
        (Value::Tensor(x), Value::Tensor(y)) => tensors_close(x, y, rtol, atol),
        _ => match (a.as_scalar(), b.as_scalar()) {
            (Some(x), Some(y)) if is_close(x, y, rtol, atol) => Ok(()),
            (Some(x), Some(y)) => Err(format!(
                "{x} and {y} differ by {} (rtol={rtol}, atol={atol})",
                (x - y).abs()
            )),
            _ => Err(format!("can't compare a {} with a {}", a.kind(), b.kind())),
        },
    }
}

fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

fn tensors_close(a: &Tensor, b: &Tensor, rtol: f64, atol: f64) -> Result<(), String> {
    let (a, b) = (a.to_cpu(), b.to_cpu());

    if a.shape() != b.shape() {
        return Err(format!(
            "shapes {:?} and {:?} differ",
            a.shape(),
            b.shape()
        ));
    }

    let mut mismatched = 0;
    let mut greatest = 0f64;

    for (&x, &y) in a.data().iter().zip(b.data().iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        if !is_close(x, y, rtol, atol) {
            mismatched += 1;
            greatest = greatest.max((x - y).abs());
        }
    }

    if mismatched == 0 {
        return Ok(());
    }

    Err(format!(
        "{mismatched} / {} elements mismatch, greatest absolute difference {greatest} \
         (rtol={rtol}, atol={atol})",
        a.data().len()
    ))
}

#[cfg(test)]
mod tests {
    use training::report::Device;

    use super::*;

    #[test]
    fn test_tensors_on_different_devices_compare_on_cpu() {
        let a = Value::from(Tensor::full(&[3], 1.0, Device::Cpu));
        let b = Value::from(Tensor::full(&[3], 1.0, Device::Cuda(0)));

        assert_eq!(assert_allclose(&a, &b, DEFAULT_RTOL, DEFAULT_ATOL), Ok(()));
    }

    #[test]
    fn test_difference_beyond_tolerance_fails() {
        let a = Value::from(Tensor::scalar(1.0, Device::Cpu));
        let b = Value::from(Tensor::scalar(0.5, Device::Cuda(0)));

        assert!(assert_allclose(&a, &b, DEFAULT_RTOL, DEFAULT_ATOL).is_err());
    }

    #[test]
    fn test_tolerances_are_configurable() {
        let compare = get_default_comparer(1e-2, 1e-2);
        let a = Value::from(Tensor::scalar(1.0, Device::Cpu));
        let b = Value::from(Tensor::scalar(0.991, Device::Cuda(0)));

        assert_eq!(compare("cpu", "gpu", "output/a", &a, &b), Ok(()));

        let strict = get_default_comparer(DEFAULT_RTOL, DEFAULT_ATOL);
        assert!(strict("cpu", "gpu", "output/a", &a, &b).is_err());
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let a = Value::from(Tensor::full(&[2], 1.0, Device::Cpu));
        let b = Value::from(Tensor::full(&[3], 1.0, Device::Cpu));

        let err = assert_allclose(&a, &b, DEFAULT_RTOL, DEFAULT_ATOL).unwrap_err();
        assert!(err.contains("shapes"));
    }

    #[test]
    fn test_integers_compare_exactly() {
        assert_eq!(assert_allclose(&Value::Int(3), &Value::Int(3), 1.0, 1.0), Ok(()));
        assert!(assert_allclose(&Value::Int(3), &Value::Int(4), 1.0, 1.0).is_err());
    }

    #[test]
    fn test_scalar_kinds_mix() {
        let a = Value::Float(2.0);
        let b = Value::from(Tensor::scalar(2.0, Device::Cpu));

        assert_eq!(assert_allclose(&a, &b, DEFAULT_RTOL, DEFAULT_ATOL), Ok(()));
        let wide = Value::from(Tensor::full(&[2], 2.0, Device::Cpu));
        assert!(assert_allclose(&a, &wide, DEFAULT_RTOL, DEFAULT_ATOL).is_err());
    }
}
