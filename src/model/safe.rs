use itertools::Itertools;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::{LoadOptions, ModelLoader, ModelSaver, ModelSource};
use crate::{
    error::{Error, Result},
    ir::{DataType, Graph, TensorKind},
};

/// Weights stored in the `safetensors` format. Every stored tensor becomes a `Const` node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafeTensorsFormat;

impl SafeTensorsFormat {
    pub const NAME: &str = "safetensors";
}

fn data_type(name: &str, dtype: Dtype) -> Result<DataType> {
    match dtype {
        Dtype::F32 => Ok(DataType::F32),
        Dtype::F16 => Ok(DataType::F16),
        Dtype::I8 => Ok(DataType::I8),
        Dtype::U8 => Ok(DataType::U8),
        Dtype::I32 => Ok(DataType::I32),
        Dtype::I16 => Ok(DataType::I16),
        dtype => Err(Error::Model(format!("{name}: unsupported dtype {dtype:?}"))),
    }
}

fn dtype(r#type: DataType) -> Dtype {
    match r#type {
        DataType::F32 => Dtype::F32,
        DataType::F16 => Dtype::F16,
        DataType::I8 => Dtype::I8,
        DataType::U8 => Dtype::U8,
        DataType::I32 => Dtype::I32,
        DataType::I16 => Dtype::I16,
    }
}

impl ModelLoader for SafeTensorsFormat {
    fn format(&self) -> &str {
        Self::NAME
    }

    fn load(&self, source: &ModelSource, options: &LoadOptions) -> Result<Graph> {
        let op = crate::runtime::runtime()?.ops().get("Const")?;
        let data = source.read()?;
        let tensors = SafeTensors::deserialize(&data)?;

        let mut graph = Graph::new(source.name());
        if let Some(layout) = options.layout {
            graph.set_layout(layout);
        }

        let views = tensors
            .tensors()
            .into_iter()
            .sorted_by(|(x, _), (y, _)| x.cmp(y))
            .collect_vec();
        for (name, view) in &views {
            let r#type = data_type(name, view.dtype())?;
            let node = graph.add_node(name, op.clone())?;
            let id = graph.add_tensor(name, r#type)?;
            graph.connect_output(node, 0, id, TensorKind::Const)?;

            let tensor = graph.tensor_mut(id)?;
            match view.shape() {
                [] => tensor.reshape([1])?,
                shape => tensor.reshape(shape)?,
            }
            tensor.write(view.data())?;
        }

        if !views.is_empty() {
            let names = views.iter().map(|(name, _)| name.as_str()).collect_vec();
            graph.set_output_nodes(&names)?;
        }
        log::debug!("{}: {} tensors", source.name(), views.len());
        Ok(graph)
    }
}

impl ModelSaver for SafeTensorsFormat {
    fn format(&self) -> &str {
        Self::NAME
    }

    fn save(&self, graph: &Graph) -> Result<Vec<u8>> {
        let mut data = vec![];
        for (_, tensor) in graph.tensors() {
            if tensor.mem().is_none() || tensor.buffer_size() == 0 {
                continue;
            }
            let mut bytes = vec![0u8; tensor.buffer_size()];
            tensor.read(&mut bytes)?;
            data.push((tensor, bytes));
        }

        let views = data
            .iter()
            .map(|(tensor, bytes)| -> Result<_> {
                let dtype = dtype(tensor.data_type());
                let shape = tensor.shape().dims().to_vec();
                let view = TensorView::new(dtype, shape, bytes)?;
                Ok((tensor.name(), view))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(safetensors::serialize(views, &None)?)
    }
}
