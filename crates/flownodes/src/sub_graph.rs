use flowcore::{FinishPolicy, FlowNode, FlowPin, NodeContext, NodeError, NodeSpec, TemplateRef};
use flowruntime::{NodeFactory, NodeMetadata};
use serde::{Deserialize, Serialize};

pub const START_PIN: &str = "Start";
pub const FINISH_PIN: &str = "Finish";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubGraphSave {
    #[serde(default)]
    saved_instance_name: String,
}

/// Runs another template as a child flow.
///
/// `Start` spawns the child; any other input fires the child's custom input
/// of the same name. The node finishes through `Finish` once the child
/// reaches its Finish node.
pub struct SubGraphNode {
    asset: Option<TemplateRef>,
    saved_instance_name: String,
}

impl FlowNode for SubGraphNode {
    fn node_type(&self) -> &str {
        "route.sub_graph"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        let Some(asset) = self.asset.clone() else {
            ctx.log_error(NodeError::MissingAsset.to_string());
            ctx.trigger_first_output(true);
            return;
        };

        if pin == START_PIN {
            ctx.create_sub_flow(asset);
        } else {
            ctx.trigger_custom_event(pin);
        }
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        if self.asset.is_some() {
            ctx.remove_sub_flow(FinishPolicy::Keep);
        }
    }

    fn can_preload(&self) -> bool {
        self.asset.is_some()
    }

    fn preload_content(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(asset) = self.asset.clone() {
            ctx.preload_sub_flow(asset);
        }
    }

    fn flush_content(&mut self, ctx: &mut NodeContext<'_>) {
        if self.asset.is_some() {
            ctx.remove_sub_flow(FinishPolicy::Abort);
        }
    }

    fn on_save(&mut self, ctx: &mut NodeContext<'_>) {
        self.saved_instance_name = ctx.sub_flow_instance_name().unwrap_or_default().to_string();
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        if self.saved_instance_name.is_empty() {
            return;
        }
        if let Some(asset) = self.asset.clone() {
            let name = std::mem::take(&mut self.saved_instance_name);
            tracing::debug!("Restoring sub flow {} of {}", name, ctx.address());
            ctx.load_sub_flow(asset, name);
        }
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(SubGraphSave {
            saved_instance_name: self.saved_instance_name.clone(),
        })
        .map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: SubGraphSave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.saved_instance_name = saved.saved_instance_name;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        self.asset.as_ref().map(|a| a.base_name().to_string())
    }
}

pub struct SubGraphNodeFactory;

impl SubGraphNodeFactory {
    fn asset(spec: &NodeSpec) -> Result<Option<TemplateRef>, NodeError> {
        match spec.config("asset") {
            None => Ok(None),
            Some(value) if value.is_null() => Ok(None),
            Some(value) => {
                let path = value.as_str().ok_or_else(|| NodeError::InvalidConfigType {
                    field: "asset".to_string(),
                    expected: "string".to_string(),
                })?;
                Ok((!path.is_empty()).then(|| TemplateRef::from(path)))
            }
        }
    }
}

impl NodeFactory for SubGraphNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(SubGraphNode {
            asset: Self::asset(spec)?,
            saved_instance_name: String::new(),
        }))
    }

    fn node_type(&self) -> &str {
        "route.sub_graph"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Runs the template named by 'asset' as a child flow".to_string(),
            category: "route".to_string(),
            inputs: vec![FlowPin::new(START_PIN)],
            outputs: vec![FlowPin::new(FINISH_PIN)],
            ..NodeMetadata::default()
        }
    }

    fn referenced_assets(&self, spec: &NodeSpec) -> Vec<TemplateRef> {
        Self::asset(spec).ok().flatten().into_iter().collect()
    }
}
