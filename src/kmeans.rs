use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

pub type Point = [f32; 3];

#[derive(Debug, Clone, Default)]
pub struct KMeansState {
    /// 所有点到所属聚类中心的距离平方和
    pub distsum: f64,
    /// 聚类中心，按包含的点数从多到少排列
    pub centroids: Vec<Point>,
    /// 每个聚类中心包含的点数
    pub centroid_frequency: Vec<usize>,
}

/// 三维空间中的 K-means 聚类，用于像素颜色
///
/// 使用 k-means++ 初始化，重复 `n_init` 次并保留总距离最小的结果。
/// 第 `i` 次运行的随机种子为 `seed + i`，因此相同输入的结果完全确定。
/// 空聚类会被丢弃，包含点数相同的聚类保持首次出现的顺序。
pub fn kmeans(data: &[Point], k: usize, n_init: usize, max_iter: usize, seed: u64) -> KMeansState {
    if data.is_empty() || k == 0 {
        return KMeansState::default();
    }

    let mut best: Option<KMeansState> = None;
    for run in 0..n_init.max(1) as u64 {
        let ks = kmeans_once(data, k, max_iter, seed.wrapping_add(run));
        // 距离相同时保留先得到的结果
        if best.as_ref().is_none_or(|b| ks.distsum < b.distsum) {
            best = Some(ks);
        }
    }

    let mut ks = best.unwrap_or_default();
    let mut order = (0..ks.centroids.len())
        .filter(|&i| ks.centroid_frequency[i] > 0)
        .collect::<Vec<_>>();
    // 稳定排序
    order.sort_by(|&a, &b| ks.centroid_frequency[b].cmp(&ks.centroid_frequency[a]));
    ks.centroids = order.iter().map(|&i| ks.centroids[i]).collect();
    ks.centroid_frequency = order.iter().map(|&i| ks.centroid_frequency[i]).collect();
    ks
}

fn kmeans_once(data: &[Point], k: usize, max_iter: usize, seed: u64) -> KMeansState {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_plus_plus(data, k, &mut rng);

    let (mut assignments, mut distsum) = update_assignments(data, &centroids);
    let mut centroid_frequency = vec![0; centroids.len()];

    for _ in 0..max_iter {
        let (new_centroids, new_frequency): (Vec<_>, Vec<_>) = (0..centroids.len())
            .into_par_iter()
            .map(|cluster_id| update_centroid(data, &assignments, cluster_id, centroids[cluster_id]))
            .unzip();
        centroids = new_centroids;
        centroid_frequency = new_frequency;

        let (new_assignments, new_distsum) = update_assignments(data, &centroids);
        distsum = new_distsum;
        // 分配结果不再变化时收敛
        if new_assignments == assignments {
            break;
        }
        assignments = new_assignments;
    }

    KMeansState { distsum, centroids, centroid_frequency }
}

/// k-means++ 初始化，按到已选中心的距离平方加权抽样
///
/// 不同的点少于 k 个时，返回的中心点数量少于 k
fn init_plus_plus(data: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..data.len())]);
    let mut min_dist = data.par_iter().map(|p| dist2(p, &centroids[0])).collect::<Vec<_>>();

    while centroids.len() < k {
        let total = min_dist.iter().map(|&d| d as f64).sum::<f64>();
        if total <= 0. {
            break;
        }
        let mut target = rng.random::<f64>() * total;
        let mut chosen = data.len() - 1;
        for (i, &d) in min_dist.iter().enumerate() {
            target -= d as f64;
            if target < 0. && d > 0. {
                chosen = i;
                break;
            }
        }
        let c = data[chosen];
        centroids.push(c);
        min_dist.par_iter_mut().zip(data.par_iter()).for_each(|(m, p)| *m = m.min(dist2(p, &c)));
    }

    centroids
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离
fn update_assignments(data: &[Point], centroids: &[Point]) -> (Vec<usize>, f64) {
    let (assignments, distances): (Vec<_>, Vec<_>) = data
        .par_iter()
        .map(|point| {
            let mut min_distance = f32::MAX;
            let mut best_cluster = 0;

            for (j, centroid) in centroids.iter().enumerate() {
                let distance = dist2(point, centroid);
                if distance < min_distance {
                    min_distance = distance;
                    best_cluster = j;
                }
            }

            (best_cluster, min_distance)
        })
        .unzip();
    let distance = distances.iter().map(|&d| d as f64).sum();
    (assignments, distance)
}

/// 更新聚类中心：计算分配给该聚类的所有点的均值，空聚类保留原中心
fn update_centroid(
    data: &[Point],
    assignments: &[usize],
    cluster_id: usize,
    old: Point,
) -> (Point, usize) {
    let mut sum = [0f64; 3];
    let mut count = 0;
    for (point, _) in data.iter().zip(assignments).filter(|(_, a)| **a == cluster_id) {
        for c in 0..3 {
            sum[c] += point[c] as f64;
        }
        count += 1;
    }
    if count == 0 {
        return (old, 0);
    }
    (sum.map(|s| (s / count as f64) as f32), count)
}

#[inline]
fn dist2(a: &Point, b: &Point) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Point> {
        let mut rng = StdRng::seed_from_u64(7);
        let centers = [[250., 10., 10.], [10., 250., 10.], [10., 10., 250.]];
        let sizes = [300, 200, 100];
        let mut data = vec![];
        for (center, size) in centers.iter().zip(sizes) {
            for _ in 0..size {
                data.push(center.map(|c: f32| c + rng.random_range(-5.0..5.0)));
            }
        }
        data.shuffle(&mut rng);
        data
    }

    #[test]
    fn test_kmeans_blobs() {
        let data = blobs();
        let ks = kmeans(&data, 3, 3, 100, 42);
        assert_eq!(ks.centroid_frequency, vec![300, 200, 100]);
        assert!((ks.centroids[0][0] - 250.).abs() < 2.);
        assert!((ks.centroids[1][1] - 250.).abs() < 2.);
        assert!((ks.centroids[2][2] - 250.).abs() < 2.);
    }

    #[test]
    fn test_kmeans_deterministic() {
        let data = blobs();
        let a = kmeans(&data, 5, 3, 100, 42);
        let b = kmeans(&data, 5, 3, 100, 42);
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.centroid_frequency, b.centroid_frequency);
    }

    #[test]
    fn test_kmeans_fewer_distinct_points() {
        let data = vec![[1., 2., 3.]; 50];
        let ks = kmeans(&data, 5, 3, 100, 42);
        assert_eq!(ks.centroids, vec![[1., 2., 3.]]);
        assert_eq!(ks.centroid_frequency, vec![50]);
        assert_eq!(ks.distsum, 0.);
    }

    #[test]
    fn test_kmeans_tie_keeps_first_cluster() {
        // 两种颜色数量相同，顺序由初始化时首先选中的中心决定，且每次一致
        let mut data = vec![[0., 0., 0.]; 10];
        data.extend(vec![[255., 255., 255.]; 10]);
        let a = kmeans(&data, 2, 1, 10, 1);
        let b = kmeans(&data, 2, 1, 10, 1);
        assert_eq!(a.centroid_frequency, vec![10, 10]);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_kmeans_empty() {
        assert!(kmeans(&[], 5, 3, 100, 42).centroids.is_empty());
        assert!(kmeans(&[[0.; 3]], 0, 3, 100, 42).centroids.is_empty());
    }
}
