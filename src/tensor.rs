//! Parameter tensor with a shared gradient cell
//!
//! Data is stored flat; `shape` is kept alongside so partial loading can
//! detect mismatches without knowing the layer that owns the tensor.

use ndarray::{Array1, ArrayView2, ArrayViewMut2};
use std::cell::RefCell;
use std::rc::Rc;

/// Trainable tensor
#[derive(Clone)]
pub struct Tensor {
    data: Array1<f32>,
    shape: Vec<usize>,
    grad: Rc<RefCell<Option<Array1<f32>>>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from flat data and its logical shape
    ///
    /// # Panics
    ///
    /// Panics if the shape does not describe `data.len()` elements.
    pub fn new(data: Array1<f32>, shape: Vec<usize>, requires_grad: bool) -> Self {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "shape {shape:?} does not match {} elements",
            data.len()
        );
        Self {
            data,
            shape,
            grad: Rc::new(RefCell::new(None)),
            requires_grad,
        }
    }

    /// Create a 1-D tensor from a vector
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        let shape = vec![data.len()];
        Self::new(Array1::from(data), shape, requires_grad)
    }

    /// Create a zero tensor of the given shape
    pub fn zeros(shape: &[usize], requires_grad: bool) -> Self {
        let n: usize = shape.iter().product();
        Self::new(Array1::zeros(n), shape.to_vec(), requires_grad)
    }

    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// View a rank-2 tensor as a matrix
    ///
    /// Returns `None` when the tensor is not rank 2.
    pub fn as_matrix(&self) -> Option<ArrayView2<'_, f32>> {
        let (rows, cols) = match self.shape[..] {
            [rows, cols] => (rows, cols),
            _ => return None,
        };
        self.data
            .as_slice()
            .and_then(|s| ArrayView2::from_shape((rows, cols), s).ok())
    }

    /// Mutable matrix view of a rank-2 tensor
    pub fn as_matrix_mut(&mut self) -> Option<ArrayViewMut2<'_, f32>> {
        let (rows, cols) = match self.shape[..] {
            [rows, cols] => (rows, cols),
            _ => return None,
        };
        self.data
            .as_slice_mut()
            .and_then(|s| ArrayViewMut2::from_shape((rows, cols), s).ok())
    }

    /// Get gradient (if computed)
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    pub fn set_grad(&self, grad: Array1<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Accumulate gradient (for when tensor is used multiple times)
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        let mut grad_ref = self.grad.borrow_mut();
        if let Some(existing) = grad_ref.as_mut() {
            *existing += &grad;
        } else {
            *grad_ref = Some(grad);
        }
    }

    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Scale the stored gradient in place
    pub fn scale_grad(&self, factor: f32) {
        if let Some(g) = self.grad.borrow_mut().as_mut() {
            g.mapv_inplace(|v| v * factor);
        }
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .field("grad", &self.grad.borrow())
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_view_matches_row_major_layout() {
        let t = Tensor::new(
            Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            vec![2, 3],
            true,
        );
        let m = t.as_matrix().unwrap();
        assert_eq!(m[[0, 2]], 3.0);
        assert_eq!(m[[1, 0]], 4.0);
    }

    #[test]
    fn test_vector_has_no_matrix_view() {
        let t = Tensor::from_vec(vec![1.0, 2.0], false);
        assert!(t.as_matrix().is_none());
    }

    #[test]
    fn test_zeros_spans_every_dimension() {
        let t = Tensor::zeros(&[2, 3], false);
        assert_eq!(t.data().len(), 6);
        assert!(t.as_matrix().is_some());
    }

    #[test]
    fn test_accumulate_and_zero_grad() {
        let t = Tensor::zeros(&[2], true);
        t.accumulate_grad(Array1::from(vec![1.0, 2.0]));
        t.accumulate_grad(Array1::from(vec![0.5, 0.5]));
        assert_eq!(t.grad().unwrap().to_vec(), vec![1.5, 2.5]);

        t.scale_grad(2.0);
        assert_eq!(t.grad().unwrap().to_vec(), vec![3.0, 5.0]);

        t.zero_grad();
        assert!(t.grad().is_none());
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_shape_must_cover_data() {
        Tensor::new(Array1::zeros(5), vec![2, 3], false);
    }
}
