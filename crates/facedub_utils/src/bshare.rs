use burn::tensor::{backend::Backend, Tensor, TensorData};
use ndarray as nd;

/// Conversion from host `ndarray` storage to a burn tensor on a device.
pub trait ToBurn<B: Backend, const D: usize> {
    fn to_burn(&self, device: &B::Device) -> Tensor<B, D>;
}

impl<B: Backend> ToBurn<B, 3> for nd::Array3<f32> {
    fn to_burn(&self, device: &B::Device) -> Tensor<B, 3> {
        let shape = [self.dim().0, self.dim().1, self.dim().2];
        let data = self.as_standard_layout().iter().copied().collect::<Vec<f32>>();
        Tensor::from_data(TensorData::new(data, shape), device)
    }
}

impl<B: Backend> ToBurn<B, 4> for nd::Array4<f32> {
    fn to_burn(&self, device: &B::Device) -> Tensor<B, 4> {
        let shape = [self.dim().0, self.dim().1, self.dim().2, self.dim().3];
        let data = self.as_standard_layout().iter().copied().collect::<Vec<f32>>();
        Tensor::from_data(TensorData::new(data, shape), device)
    }
}

/// Moves a `[n, c, h, w]` tensor to host memory as an `ndarray`.
///
/// # Panics
/// Will panic if the tensor data cannot be read back as `f32`
pub fn tensor_to_array4<B: Backend>(tensor: &Tensor<B, 4>) -> nd::Array4<f32> {
    let [n, c, h, w] = tensor.dims();
    let data = tensor.to_data().convert::<f32>().to_vec::<f32>().expect("Tensor data should convert to f32");
    nd::Array4::from_shape_vec((n, c, h, w), data).expect("Shape mismatch during tensor to ndarray conversion")
}
