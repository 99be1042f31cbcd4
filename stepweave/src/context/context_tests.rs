//! Tests for the context module.

#[cfg(test)]
mod tests {
    use crate::context::{
        expression_view, prefix_name, suffix_name, token_index, ContextSnapshot, ParamValue,
        StepContext, StepResult, Tag, Template,
    };
    use crate::driver::ContainerStatus;
    use pretty_assertions::assert_eq;

    fn populated() -> StepContext {
        let mut ctx = StepContext::new("/tmp/run");
        ctx.envs.insert("FOO".into(), "foo".into());
        ctx.secrets.insert("TOKEN".into(), "t0k3n".into());
        ctx.inputs.insert("name".into(), ParamValue::string("world"));
        ctx.matrix.insert("os".into(), "linux".into());
        ctx.steps.insert("build".into(), StepResult::started());
        ctx.containers.insert(
            "build".into(),
            ContainerStatus {
                container_id: "abc".into(),
                name: "build".into(),
                ..ContainerStatus::default()
            },
        );
        ctx.with_tag(Tag::new("team", "core"));
        ctx
    }

    #[test]
    fn test_deep_copy_isolation() {
        let original = populated();
        let mut copy = original.deep_copy();

        copy.envs.insert("BAR".into(), "bar".into());
        copy.envs.insert("FOO".into(), "changed".into());
        copy.secrets.clear();
        copy.inputs.insert("extra".into(), ParamValue::Bool(true));
        copy.matrix.insert("arch".into(), "arm64".into());
        copy.steps.remove("build");
        copy.containers.clear();
        copy.output_vars.insert("x".into(), ParamValue::string("y"));
        copy.bindings.insert("k".into(), serde_json::json!(1));
        copy.with_tag(Tag::new("team", "other"));

        assert_eq!(original.envs.len(), 1);
        assert_eq!(original.envs["FOO"], "foo");
        assert_eq!(original.secrets.len(), 1);
        assert_eq!(original.inputs.len(), 1);
        assert_eq!(original.matrix.len(), 1);
        assert!(original.steps.contains_key("build"));
        assert_eq!(original.containers.len(), 1);
        assert!(original.output_vars.is_empty());
        assert!(original.bindings.is_empty());
        assert_eq!(original.tags[0].value, "core");
    }

    #[test]
    fn test_merge_idempotent_on_disjoint_keys() {
        let mut a = StepContext::new("/tmp/run");
        a.envs.insert("A".into(), "1".into());
        a.steps.insert("one".into(), StepResult::started());

        let mut b = StepContext::new("/tmp/run");
        b.envs.insert("B".into(), "2".into());
        b.secrets.insert("S".into(), "s".into());
        b.steps.insert("two".into(), StepResult::started());
        b.containers.insert("two".into(), ContainerStatus::default());

        a.merge(&b);
        let once = (
            a.envs.clone(),
            a.secrets.clone(),
            a.steps.clone(),
            a.containers.clone(),
        );

        a.merge(&b);
        let twice = (
            a.envs.clone(),
            a.secrets.clone(),
            a.steps.clone(),
            a.containers.clone(),
        );

        assert_eq!(once, twice);
        assert_eq!(a.envs.len(), 2);
        assert_eq!(a.steps.len(), 2);
    }

    #[test]
    fn test_merge_template_first_non_empty_wins() {
        let mut a = StepContext::new("/tmp/run");
        a.template = Some(Template {
            image: "alpine".into(),
            ..Template::default()
        });

        let mut b = StepContext::new("/tmp/run");
        b.template = Some(Template {
            image: "debian".into(),
            working_dir: "/work".into(),
            ..Template::default()
        });

        a.merge(&b);
        let template = a.template.unwrap_or_default();
        assert_eq!(template.image, "alpine");
        assert_eq!(template.working_dir, "/work");
    }

    #[test]
    fn test_merge_delta_matches_merge() {
        let mut via_merge = StepContext::new("/tmp/run");
        let mut via_delta = StepContext::new("/tmp/run");
        let other = populated();

        via_merge.merge(&other);
        via_delta.merge_delta(&other.delta());

        assert_eq!(via_merge.envs, via_delta.envs);
        assert_eq!(via_merge.steps, via_delta.steps);
        assert_eq!(via_merge.containers, via_delta.containers);
    }

    #[test]
    fn test_isolated_keeps_dir_and_template_only() {
        let mut ctx = populated();
        ctx.template = Some(Template {
            image: "alpine".into(),
            ..Template::default()
        });

        let isolated = ctx.isolated();
        assert_eq!(isolated.dir, ctx.dir);
        assert_eq!(isolated.template, ctx.template);
        assert!(isolated.envs.is_empty());
        assert!(isolated.inputs.is_empty());
        assert!(isolated.steps.is_empty());
        assert!(std::sync::Arc::ptr_eq(&isolated.scope, &ctx.scope));
    }

    #[test]
    fn test_with_tag_replaces_same_key() {
        let mut ctx = StepContext::new("/tmp");
        ctx.with_tag(Tag::new("matrix/os", "linux"));
        ctx.with_tag(Tag::new("pipeline", "ci").with_color("#ffffff"));
        ctx.with_tag(Tag::new("matrix/os", "darwin"));

        assert_eq!(ctx.tags.len(), 2);
        assert_eq!(ctx.tags[0].value, "darwin");
        assert!(!ctx.tags[0].color.is_empty());
        assert_eq!(ctx.tags[1].color, "#ffffff");
        assert!(ctx.has_tag("pipeline"));
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(prefix_name("build", ""), "build");
        assert_eq!(prefix_name("build", "ci"), "ci-build");
        assert_eq!(suffix_name("build", ""), "build");
        assert_eq!(suffix_name("build", "lint"), "build-lint");
    }

    #[test]
    fn test_token_index_flattens_view() {
        let mut ctx = populated();
        let mut result = StepResult::started();
        result
            .outputs
            .insert("version".into(), ParamValue::string("1.2.3"));
        result
            .outputs
            .insert("targets".into(), ParamValue::array(["a", "b"]));
        ctx.steps.insert("build".into(), result);

        let index = token_index(&expression_view(&ctx));

        assert_eq!(index["context.envs.FOO"], "foo");
        assert_eq!(index["context.inputs.name"], "world");
        assert_eq!(index["context.matrix.os"], "linux");
        assert_eq!(index["context.steps.build.outputs.version"], "1.2.3");
        assert_eq!(index["context.steps.build.outputs.targets"], "a,b");
        assert_eq!(index["context.tags.team"], "core");
        assert!(!index.contains_key("context.dataDir"));
    }

    #[tokio::test]
    async fn test_snapshot_persistence_skips_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = populated();
        let mut done = StepResult::started();
        done.seal(&Ok(()));
        ctx.steps.insert("done".into(), done.clone());

        ContextSnapshot::capture(&ctx).store(dir.path()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("context.json")).unwrap();
        assert!(!raw.contains("t0k3n"));

        let snapshot = ContextSnapshot::load(dir.path()).await.unwrap().unwrap();
        let mut fresh = StepContext::new(dir.path());
        fresh.inputs.insert("name".into(), ParamValue::string("override"));
        snapshot.restore_into(&mut fresh);

        assert_eq!(fresh.steps["done"], done);
        assert_eq!(fresh.containers["build"].container_id, "abc");
        assert_eq!(fresh.inputs["name"], ParamValue::string("override"));
        assert_eq!(fresh.envs["FOO"], "foo");
        assert!(fresh.secrets.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ContextSnapshot::load(dir.path()).await.unwrap().is_none());
    }
}
