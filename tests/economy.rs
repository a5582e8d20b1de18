use equilibria::calc::World;
use equilibria::cascade::{Economy, Region, Resource, Sector, Subsector, Technology};
use equilibria::{
    BisectionOptions, ComponentConfig, MarketId, MarketKind, MarketRef, MarketSet,
    NewtonOptions, Scenario, Solver, SolverOptions,
};

/// Global crude supplied from a graded resource, refined in two regions and
/// consumed by their transport sectors.
fn build_economy(usa_growth: f64) -> World<Economy> {
    let mut markets = MarketSet::new();
    let crude = markets
        .add_market(MarketId::new("crude oil", "global"), MarketKind::Normal, 10.0)
        .unwrap();
    let usa_refined = markets
        .add_market(MarketId::new("refined oil", "usa"), MarketKind::Normal, 20.0)
        .unwrap();
    let eu_refined = markets
        .add_market(MarketId::new("refined oil", "eu"), MarketKind::Normal, 15.0)
        .unwrap();

    let refining = |refined: &MarketRef| {
        Sector::supply("refining", refined.clone(), 50.0, 1.0).with_subsector(
            Subsector::new("refineries")
                .with_technology(Technology::new("refinery", 1.0).with_input(crude.clone(), 1.2)),
        )
    };
    let transport = |refined: &MarketRef, base_service: f64| {
        Sector::final_demand("transport", base_service, 10.0, -0.8)
            .unwrap()
            .with_subsector(
                Subsector::new("road").with_technology(
                    Technology::new("car", 0.0).with_input(refined.clone(), 1.0),
                ),
            )
    };

    let curve = vec![(0.0, 0.0), (5.0, 100.0), (20.0, 200.0), (100.0, 300.0)];
    let usa = Region::new("usa")
        .with_resource(Resource::new(crude.clone(), curve).unwrap())
        .with_sector(refining(&usa_refined))
        .with_sector(transport(&usa_refined, 120.0).with_growth(usa_growth));
    let eu = Region::new("eu")
        .with_sector(refining(&eu_refined))
        .with_sector(transport(&eu_refined, 80.0));

    World::new(markets, Economy::new(vec![usa, eu]))
}

fn options() -> SolverOptions {
    SolverOptions::default()
        .with_solution_tolerance(1e-6)
        .with_components(vec![
            ComponentConfig::LogNewtonRaphson(NewtonOptions::default()),
            ComponentConfig::BisectAll(BisectionOptions::default()),
        ])
}

#[test]
fn cascade_economy_clears() {
    let mut world = build_economy(0.0);
    let mut solver = Solver::new(options()).unwrap();

    let report = solver.solve_period(&mut world, 0).unwrap();
    assert!(report.is_solved());
    for market in world.markets().iter() {
        assert!(market.relative_excess_demand(1e-4).abs() <= 1e-6);
        assert!(market.price() > 0.0);
    }

    // The crude price settles between the middle grades of the resource curve,
    // and the larger region pays more for refined products.
    let crude = world
        .markets()
        .price(&MarketId::new("crude oil", "global"))
        .unwrap();
    assert!(crude > 5.0 && crude < 20.0);
    let usa = world
        .markets()
        .price(&MarketId::new("refined oil", "usa"))
        .unwrap();
    let eu = world
        .markets()
        .price(&MarketId::new("refined oil", "eu"))
        .unwrap();
    assert!(usa > eu);
}

#[test]
fn growing_demand_raises_prices_across_periods() {
    let world = build_economy(0.05);
    let mut scenario = Scenario::new(world, Solver::new(options()).unwrap());

    let reports = scenario.run(0..3).unwrap();
    assert!(reports.iter().all(|report| report.is_solved()));

    let crude_id = MarketId::new("crude oil", "global");
    let crude: Vec<f64> = reports
        .iter()
        .map(|report| report.market(&crude_id).unwrap().price)
        .collect();
    assert!(crude.windows(2).all(|pair| pair[1] > pair[0]));
    assert_eq!(scenario.reports().len(), 3);
}
