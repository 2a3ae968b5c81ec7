use pixelbench::compose::{Composer, CoupledModel, LocalCommunicator, RootCoordinator};
use pixelbench::config::{self, CommonConfig};
use pixelbench::dsl::TopologyBuilder;
use pixelbench::graph::{NodeId, PortId, Topology};
use pixelbench::model::{AtomicModel, Bag, ChildModel, ProxyHandle};
use pixelbench::pixel::{NormalPixel, Phase};
use proptest::prelude::*;
use std::sync::Arc;

fn pixel_config(neighbours: u64) -> CommonConfig {
    CommonConfig::new()
        .with(config::NAME, "p")
        .with(config::DURATION, 0i64)
        .with(config::NEIGHBOUR_NUMBER, neighbours)
}

fn random_topology(vertices: usize, edges: &[(usize, usize)]) -> Topology {
    let mut builder = TopologyBuilder::new();
    let handles: Vec<_> = (0..vertices).map(|_| builder.node("normal")).collect();
    for &(from, to) in edges {
        builder
            .link(handles[from % vertices], handles[to % vertices])
            .unwrap();
    }
    builder.build()
}

proptest! {
    #[test]
    fn send_exactly_at_neighbour_count(
        neighbours in 1u64..20,
        batches in prop::collection::vec(1usize..5, 1..30),
    ) {
        let mut pixel = NormalPixel::new();
        AtomicModel::init(&mut pixel, &pixel_config(neighbours), 0.0).unwrap();
        let mut received = 0u64;
        for size in batches {
            pixel
                .external_transition(0.0, &Bag::on(PortId(0), &vec![1.0; size]))
                .unwrap();
            received += size as u64;
            prop_assert_eq!(pixel.phase() == Phase::Send, received == neighbours);
            if received >= neighbours {
                break;
            }
        }
    }

    #[test]
    fn child_configs_are_independent_and_repeatable(
        vertices in 1usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20),
    ) {
        let topology = random_topology(vertices, &edges);
        let parent = CommonConfig::new().with(config::NAME, "s0").with(config::DURATION, 5i64);
        let mut composer = Composer::new();
        composer.apply_common(&parent).unwrap();

        let mut total = 0u64;
        for child in 0..vertices {
            let first = composer.update_common(&parent, &topology, child, &mut []).unwrap();
            let second = composer.update_common(&parent, &topology, child, &mut []).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.get::<i64>(config::DURATION), Ok(5));
            let neighbours = first.get::<u64>(config::NEIGHBOUR_NUMBER).unwrap();
            prop_assert_eq!(neighbours as usize, topology.in_degree(NodeId(child)));
            total += neighbours;
        }
        prop_assert_eq!(total as usize, topology.edges.len());
        prop_assert_eq!(parent.get::<String>(config::NAME), Ok("s0".to_string()));
        prop_assert!(!parent.contains(config::NEIGHBOUR_NUMBER));
    }

    #[test]
    fn coordinator_ranks_cover_the_group(children in 1usize..16) {
        let coordinator = RootCoordinator::new(Arc::new(LocalCommunicator::new(0, children + 1)));
        let mut proxies: Vec<ChildModel> =
            (0..children).map(|_| ChildModel::Remote(ProxyHandle::default())).collect();
        let topology = Topology::new();
        for child in 0..children {
            coordinator
                .update_common(&CommonConfig::new(), &topology, child, &mut proxies)
                .unwrap();
        }
        let ranks: Vec<usize> = proxies.iter().filter_map(ChildModel::proxy).map(|p| p.rank).collect();
        prop_assert_eq!(ranks, (1..=children).collect::<Vec<_>>());

        let short = RootCoordinator::new(Arc::new(LocalCommunicator::new(0, children)));
        let last = children - 1;
        prop_assert!(short
            .update_common(&CommonConfig::new(), &topology, last, &mut proxies)
            .is_err());
    }
}
